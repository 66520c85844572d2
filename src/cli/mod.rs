//! CLI: 命令行接口和参数解析模块
//!
//! ## 主要功能
//!
//! - 命令行参数解析，合并到配置文件
//! - URL 列表处理（命令行参数和文件）
//! - 由 URL 推断目标文件名
//! - 配置文件编辑器集成
//!
//! ## 支持的命令
//!
//! - 基本下载：`galadown <url>`
//! - 批量下载：`galadown -f urls.txt`
//! - 编辑配置：`galadown -e`
//! - 并发与限速：`galadown -j 2 -l 1048576 <url>`
//! - 优先级：`galadown -p 9 <url>`
//!
//! ## 平台支持
//!
//! - Windows: `%APPDATA%/galadown/galadown.conf`
//! - macOS: `~/Library/Application Support/galadown/galadown.conf`
//! - Linux: `~/.config/galadown/galadown.conf`

use clap::Parser;
use log::LevelFilter;
use regex::Regex;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use url::Url;

use crate::config::Config;
use crate::core::error::DownloadError;
use crate::core::task::state::TransferKind;

/// 获取平台默认配置文件路径
pub fn default_config_path() -> String {
    #[cfg(target_os = "windows")]
    {
        let appdata = env::var("APPDATA").unwrap_or_else(|_| ".".to_string());
        format!("{}/galadown/galadown.conf", appdata)
    }
    #[cfg(target_os = "macos")]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/Library/Application Support/galadown/galadown.conf", home)
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        format!("{}/.config/galadown/galadown.conf", home)
    }
}

/// 打开配置文件编辑器
pub fn open_config_in_editor(config_path: &str) {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("notepad").arg(config_path).status().ok();
    }
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg("-e").arg(config_path).status().ok();
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        // 优先 $EDITOR，其次 xdg-open，最后 nano
        if let Ok(editor) = env::var("EDITOR") {
            if std::process::Command::new(editor).arg(config_path).status().is_ok() {
                return;
            }
        }
        if std::process::Command::new("xdg-open").arg(config_path).status().is_err() {
            let _ = std::process::Command::new("nano").arg(config_path).status();
        }
    }
}

/// galadown 命令行参数
///
/// 示例用法：
///   galadown https://cdn.example.com/setup_game.exe
///   galadown -e  # 编辑配置文件
///   galadown -j 2 -p 9 https://cdn.example.com/patch.bin
///
/// 更多用法请加 --help 查看
#[derive(Parser, Debug, Clone)]
#[command(
    name = "galadown",
    author = "panzhifu",
    version = env!("CARGO_PKG_VERSION"),
    about = "游戏安装包、补丁和 DLC 的下载管理器",
    long_about = "支持断点续传、优先级调度、并发上限和实时进度显示的下载管理器。\n\n运行时按键：p 暂停全部, r 恢复全部, c 取消全部, q 退出（未完成的任务下次启动继续）。\n\n示例：\n  galadown https://cdn.example.com/setup_game.exe\n  galadown -e\n  galadown -j 2 -l 1048576 -f urls.txt\n"
)]
pub struct Args {
    /// 要下载的URL列表（可同时指定多个）
    #[arg(required = false, help = "要下载的URL列表，可以同时指定多个URL。")]
    pub urls: Vec<String>,

    /// 包含URL列表的文件路径
    #[arg(short, long, help = "包含URL列表的文件路径，每行一个URL，# 开头为注释。")]
    pub file: Option<String>,

    /// 配置文件路径，默认为平台推荐路径
    #[arg(short = 'c', long, default_value_t = default_config_path(), help = "配置文件路径，默认为平台推荐路径。")]
    pub config: String,

    /// 编辑配置文件（-e 或 --edit）
    #[arg(short = 'e', long = "edit", help = "用系统默认编辑器打开配置文件并退出。")]
    pub edit_config: bool,

    /// 单任务下载速度限制（字节/秒），0 表示不限速
    #[arg(long, short = 'l', help = "单任务下载速度限制（字节/秒），0 表示不限速。")]
    pub speed_limit: Option<u64>,

    /// 指定下载目录
    #[arg(long, short = 'd', help = "指定下载目录，覆盖配置文件中的设置。")]
    pub download_dir: Option<String>,

    /// 指定下载文件名
    #[arg(long, short = 'n', help = "指定下载文件名，覆盖URL自动推断，只能配合单个URL使用。")]
    pub file_name: Option<String>,

    /// 同时下载的任务数
    #[arg(long, short = 'j', help = "同时下载的任务数，覆盖配置文件中的设置。")]
    pub concurrency: Option<usize>,

    /// 任务优先级
    #[arg(long, short = 'p', help = "任务优先级（0-10，越大越先下载）。")]
    pub priority: Option<i32>,

    /// 文件类型
    #[arg(long, default_value = "installer", help = "文件类型：installer, dlc, update, patch, thumbnail, icon, other。")]
    pub kind: TransferKind,

    /// 关联的游戏/商品标识
    #[arg(long = "item", help = "关联的游戏或商品标识，用于按商品查询下载。")]
    pub item_ref: Option<String>,

    /// 访问令牌
    #[arg(long, help = "访问令牌，未指定时读取环境变量 GALADOWN_TOKEN。")]
    pub token: Option<String>,

    /// 日志级别
    #[arg(long, default_value = "info", help = "日志级别：off, error, warn, info, debug, trace。")]
    pub log_level: String,

    /// 关闭自动重试
    #[arg(long, help = "失败后不自动重试。")]
    pub no_retry: bool,
}

impl Args {
    /// 加载（或创建）配置文件，合并命令行参数并校验
    pub fn load_config(&self) -> Result<Config, DownloadError> {
        let mut config = Config::load(&self.config)?;
        config.merge_from_args(self);
        config
            .validate()
            .map_err(|e| DownloadError::Config(format!("配置无效: {}", e)))?;
        if let Some(priority) = self.priority {
            crate::utils::validator::validate_priority(priority)
                .map_err(|e| DownloadError::Validation(e.to_string()))?;
        }
        Ok(config)
    }

    pub fn log_level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    // 定义从文件中读取URL的方法
    pub fn get_urls(&self) -> Result<Vec<String>, DownloadError> {
        let mut urls = Vec::new();
        urls.extend_from_slice(&self.urls);

        if let Some(file_path) = &self.file {
            let content = fs::read_to_string(file_path)
                .map_err(|e| DownloadError::Validation(format!("无法读取URL文件 {}: {}", file_path, e)))?;

            // 按行读取URL，忽略空行和注释
            for line in content.lines() {
                let line = line.trim();
                if !line.is_empty() && !line.starts_with('#') {
                    urls.push(line.to_string());
                }
            }
        }

        if urls.is_empty() {
            return Err(DownloadError::Validation(
                "未提供任何URL。请通过命令行参数或文件提供至少一个URL。".to_string(),
            ));
        }
        if let Some(bad) = urls.iter().find(|u| !crate::utils::validator::is_valid_url(u)) {
            return Err(DownloadError::Validation(format!("无效的URL: {}", bad)));
        }
        if self.file_name.is_some() && urls.len() > 1 {
            return Err(DownloadError::Validation(
                "--file-name 只能配合单个URL使用".to_string(),
            ));
        }

        Ok(urls)
    }
}

/// 文件名中不允许的字符
fn sanitize_file_name(name: &str) -> Result<String, DownloadError> {
    let pattern = Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#)
        .map_err(|e| DownloadError::Unknown(e.to_string()))?;
    Ok(pattern.replace_all(name.trim(), "_").into_owned())
}

/// 由 URL 推断目标路径：download_dir/文件名
pub fn destination_for(
    url: &str,
    file_name: Option<&str>,
    config: &Config,
) -> Result<PathBuf, DownloadError> {
    let name = match file_name {
        Some(name) => name.to_string(),
        None => {
            let parsed = Url::parse(url)
                .map_err(|e| DownloadError::Validation(format!("无效的URL {}: {}", url, e)))?;
            parsed
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .map(|s| s.to_string())
                .or_else(|| parsed.host_str().map(|h| format!("{}.download", h)))
                .unwrap_or_else(|| format!("download_{}", chrono::Utc::now().timestamp()))
        }
    };

    let name = sanitize_file_name(&name)?;
    if name.is_empty() || name == "." || name == ".." {
        return Err(DownloadError::Validation(format!("无法从 {} 推断文件名", url)));
    }
    Ok(Path::new(&config.download_dir).join(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        let args = Args::try_parse_from(["galadown", "https://example.com/file.zip"]).unwrap();
        assert_eq!(args.urls.len(), 1);
        assert_eq!(args.kind, TransferKind::Installer);
        assert_eq!(args.log_level(), LevelFilter::Info);
        assert!(!args.no_retry);

        let args = Args::try_parse_from([
            "galadown",
            "--kind",
            "dlc",
            "--item",
            "witcher3",
            "--log-level",
            "debug",
            "https://example.com/dlc.bin",
        ])
        .unwrap();
        assert_eq!(args.kind, TransferKind::Dlc);
        assert_eq!(args.item_ref.as_deref(), Some("witcher3"));
        assert_eq!(args.log_level(), LevelFilter::Debug);

        assert!(Args::try_parse_from(["galadown", "--kind", "movie", "https://example.com/a"]).is_err());
    }

    #[test]
    fn test_config_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("galadown.conf");
        let path = path.to_str().unwrap();

        let args = Args::try_parse_from(["galadown", "-c", path, "-j", "3", "https://example.com/file.zip"]).unwrap();
        let config = args.load_config().unwrap();
        assert_eq!(config.max_concurrent_downloads, 3);
        assert!(Path::new(path).exists());

        let args = Args::try_parse_from(["galadown", "-c", path, "-j", "0", "https://example.com/file.zip"]).unwrap();
        assert!(matches!(args.load_config(), Err(DownloadError::Config(_))));

        let args = Args::try_parse_from(["galadown", "-c", path, "-p", "11", "https://example.com/file.zip"]).unwrap();
        assert!(args.load_config().is_err());
    }

    #[test]
    fn test_url_file_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let url_file = dir.path().join("urls.txt");
        let content = "# 这是一个注释\nhttps://example.com/file1.zip\n\nhttps://example.com/file2.zip\n";
        fs::write(&url_file, content).unwrap();

        let args = Args::try_parse_from(["galadown", "-f", url_file.to_str().unwrap()]).unwrap();
        let urls = args.get_urls().unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0], "https://example.com/file1.zip");
        assert_eq!(urls[1], "https://example.com/file2.zip");

        fs::write(&url_file, "not-a-url\n").unwrap();
        assert!(args.get_urls().is_err());

        let args = Args::try_parse_from(["galadown"]).unwrap();
        assert!(args.get_urls().is_err());

        let args = Args::try_parse_from(["galadown", "-n", "a.bin", "https://a.example/1", "https://a.example/2"]).unwrap();
        assert!(args.get_urls().is_err());
    }

    #[test]
    fn test_destination_inference() {
        let mut config = Config::default();
        config.download_dir = "/games".to_string();

        let dest = destination_for("https://cdn.example.com/builds/setup_game.exe?sig=abc", None, &config).unwrap();
        assert_eq!(dest, Path::new("/games/setup_game.exe"));

        let dest = destination_for("https://cdn.example.com/", None, &config).unwrap();
        assert_eq!(dest, Path::new("/games/cdn.example.com.download"));

        let dest = destination_for("https://cdn.example.com/x", Some("a:b?.bin"), &config).unwrap();
        assert_eq!(dest, Path::new("/games/a_b_.bin"));

        assert!(destination_for("https://cdn.example.com/x", Some(".."), &config).is_err());
    }
}
