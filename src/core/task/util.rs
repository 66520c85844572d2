use sha2::{Digest, Sha256};
use std::io::{Read, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use crate::core::error::DownloadError;

/// 每次落盘的块大小
pub const DOWNLOAD_CHUNK_SIZE: usize = 1024 * 1024;
/// 进度事件的最短间隔
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
/// 活动任务两次进度事件的最长间隔
pub const PROGRESS_HEARTBEAT: Duration = Duration::from_secs(5);

const PARTIAL_SUFFIX: &str = ".partial";

/// `<destination>.partial`
pub fn partial_path_for(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// 计算文件的 SHA-256（阻塞，放在 spawn_blocking 中调用）
pub fn sha256_file(path: &Path) -> Result<String, DownloadError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 256 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// 缓冲区管理器：攒满一个块再写入 .partial
pub struct BufferManager {
    buffer: Vec<u8>,
    buffer_size: usize,
    file_handle: tokio::fs::File,
    /// 已经落盘的字节数（包含续传偏移）
    position: u64,
}

impl BufferManager {
    /// 打开 .partial 并定位到 offset，offset 之后的内容会被截掉
    pub async fn open(path: &Path, offset: u64, buffer_size: usize) -> Result<Self, DownloadError> {
        let mut file_handle = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .await?;
        file_handle.set_len(offset).await?;
        file_handle.seek(SeekFrom::Start(offset)).await?;

        Ok(Self {
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            file_handle,
            position: offset,
        })
    }

    /// 向缓冲区追加数据，返回缓冲区是否已满
    pub fn write(&mut self, data: &[u8]) -> bool {
        self.buffer.extend_from_slice(data);
        self.is_full()
    }

    /// 将缓冲区内容刷入文件，返回本次写入的字节数
    pub async fn flush(&mut self) -> Result<usize, DownloadError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        self.file_handle.write_all(&self.buffer).await?;
        let written = self.buffer.len();
        self.position += written as u64;
        self.buffer.clear();
        Ok(written)
    }

    /// 刷盘并 fsync，关闭文件句柄
    pub async fn finish(mut self) -> Result<u64, DownloadError> {
        self.flush().await?;
        self.file_handle.flush().await?;
        self.file_handle.sync_all().await?;
        Ok(self.position)
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// 落盘字节 + 缓冲中的字节
    pub fn received(&self) -> u64 {
        self.position + self.buffer.len() as u64
    }

    pub fn is_full(&self) -> bool {
        self.buffer.len() >= self.buffer_size
    }
}

/// 速度限制器：按块节流，使本次运行的平均速度不超过上限
pub struct SpeedLimiter {
    max_speed: u64, // B/s
    window_start: Instant,
    bytes_in_window: u64,
}

impl SpeedLimiter {
    pub fn new() -> Self {
        Self {
            max_speed: 0,
            window_start: Instant::now(),
            bytes_in_window: 0,
        }
    }

    /// 记录一块数据并返回需要等待的时间；上限可以在运行中变化
    pub fn wait_if_needed(&mut self, max_speed: u64, bytes: u64) -> Duration {
        if max_speed == 0 {
            self.max_speed = 0;
            return Duration::ZERO;
        }
        if max_speed != self.max_speed {
            // 上限变化后重新计时
            self.max_speed = max_speed;
            self.window_start = Instant::now();
            self.bytes_in_window = 0;
        }
        self.bytes_in_window += bytes;
        let budget = Duration::from_secs_f64(self.bytes_in_window as f64 / max_speed as f64);
        budget.saturating_sub(self.window_start.elapsed())
    }
}

impl Default for SpeedLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// 速度计：按时间窗口采样并做指数平滑
pub struct SpeedMeter {
    window: Duration,
    alpha: f64,
    last_sample: Instant,
    last_bytes: u64,
    smoothed: Option<f64>,
}

impl SpeedMeter {
    pub fn new(start_bytes: u64) -> Self {
        Self::starting_at(start_bytes, Instant::now())
    }

    pub fn starting_at(start_bytes: u64, now: Instant) -> Self {
        Self {
            window: Duration::from_millis(500),
            alpha: 0.3,
            last_sample: now,
            last_bytes: start_bytes,
            smoothed: None,
        }
    }

    /// 窗口未满时返回上一次的平滑值
    pub fn sample_at(&mut self, bytes: u64, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.last_sample);
        if elapsed < self.window {
            return self.current();
        }
        let delta = bytes.saturating_sub(self.last_bytes) as f64;
        let instant = delta / elapsed.as_secs_f64();
        self.smoothed = Some(match self.smoothed {
            Some(prev) => self.alpha * instant + (1.0 - self.alpha) * prev,
            None => instant,
        });
        self.last_sample = now;
        self.last_bytes = bytes;
        self.current()
    }

    pub fn current(&self) -> u64 {
        self.smoothed.map(|s| s.round() as u64).unwrap_or(0)
    }
}

/// 进度事件节流：最多每秒一次
pub struct ProgressClock {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressClock {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn should_publish(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
