use chrono::Local; // 用于获取本地时间
use log::LevelFilter; // 用于设置日志级别
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// 默认日志文件
pub const DEFAULT_LOG_FILE: &str = "logs/galadown.log";
/// 单个日志文件的最大大小 (bytes)
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// 按大小轮转的日志文件，超过上限时把当前文件改名为 `.backup`
pub struct RotatingFile {
    writer: BufWriter<File>,
    file_path: PathBuf,
    max_size: u64,
    current_size: u64,
}

impl RotatingFile {
    pub fn new(file_path: impl AsRef<Path>, max_size: u64) -> io::Result<Self> {
        let file_path = file_path.as_ref().to_path_buf();
        // 确保日志目录存在
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&file_path)?;
        let current_size = file.metadata().map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            writer: BufWriter::new(file),
            file_path,
            max_size,
            current_size,
        })
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.file_path.as_os_str().to_owned();
        name.push(".backup");
        PathBuf::from(name)
    }

    /// 检查并执行日志轮转
    fn check_rotation(&mut self) -> io::Result<()> {
        if self.current_size < self.max_size {
            return Ok(());
        }
        self.writer.flush()?;

        let backup_path = self.backup_path();
        if backup_path.exists() {
            std::fs::remove_file(&backup_path)?;
        }
        std::fs::rename(&self.file_path, &backup_path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        self.writer = BufWriter::new(file);
        self.current_size = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.check_rotation()?;
        self.writer.write_all(buf)?;
        self.current_size += buf.len() as u64;
        // 一条记录写完就刷盘
        if buf.ends_with(b"\n") {
            self.writer.flush()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// 初始化全局日志：env_logger 输出到轮转文件，RUST_LOG 优先于传入的级别
pub fn init_logger(file_path: &str, level: LevelFilter, max_size: u64) -> io::Result<()> {
    let file = RotatingFile::new(file_path, max_size)?;
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_keeps_one_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("galadown.log");
        let mut file = RotatingFile::new(&path, 64).unwrap();

        for i in 0..20 {
            file.write_all(format!("第 {} 条日志记录\n", i).as_bytes()).unwrap();
        }
        file.flush().unwrap();

        let backup = file.backup_path();
        assert!(backup.exists());
        assert!(std::fs::metadata(&path).unwrap().len() <= 64 + 32);
        let current = std::fs::read_to_string(&path).unwrap();
        assert!(current.contains("第 19 条"));
    }

    #[test]
    fn test_appends_to_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "旧的记录\n").unwrap();

        let mut file = RotatingFile::new(&path, 1024).unwrap();
        writeln!(file, "新的记录").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("旧的记录"));
        assert!(content.contains("新的记录"));
    }
}
