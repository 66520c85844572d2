use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::core::error::DownloadError;
use crate::core::task::state::DEFAULT_PRIORITY;

/// 配置结构体
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 默认下载目录
    pub download_dir: String,
    /// 最大并发下载数（运行中可修改）
    pub max_concurrent_downloads: usize,
    /// 单任务限速（B/s），0 表示不限速
    pub speed_limit_bytes_per_sec: u64,
    /// 连接/响应头超时时间（秒）
    pub timeout: u64,
    /// 读取响应体的单次超时（秒）
    pub read_timeout: u64,
    /// User-Agent
    pub user_agent: String,
    /// 未指定时的任务优先级
    pub default_priority: i32,
    /// 自动重试次数，0 表示只允许手动重试
    pub retry_count: usize,
    /// 重试延迟（秒）
    pub retry_delay: u64,
    /// 最大重试延迟（秒）
    pub retry_max_delay: u64,
    /// 启动时自动恢复未完成的任务
    pub auto_resume_on_startup: bool,
    /// 任务记录文件，空字符串表示不保存
    pub state_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_dir: "./downloads".to_string(),
            max_concurrent_downloads: 4,
            speed_limit_bytes_per_sec: 0, // 默认不限速
            timeout: 30,
            read_timeout: 60,
            user_agent: concat!("galadown/", env!("CARGO_PKG_VERSION")).to_string(),
            default_priority: DEFAULT_PRIORITY,
            retry_count: 3,
            retry_delay: 5,
            retry_max_delay: 60,
            auto_resume_on_startup: true,
            state_file: "downloads/transfers.json".to_string(),
        }
    }
}

impl Config {
    /// 加载配置文件；文件不存在时写入带注释的默认配置
    pub fn load(path: &str) -> Result<Self, DownloadError> {
        if Path::new(path).exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| DownloadError::Config(format!("无法读取配置文件 {}: {}", path, e)))?;
            match toml::from_str(&content) {
                Ok(config) => Ok(config),
                Err(e) => {
                    log::warn!("配置文件格式错误: {}，将使用默认配置", e);
                    Ok(Config::default())
                }
            }
        } else {
            let config = Config::default();
            config.save_with_tutorial(path)?;
            Ok(config)
        }
    }

    /// 保存带教程的配置文件（唯一写入方法）
    pub fn save_with_tutorial(&self, path: &str) -> Result<(), DownloadError> {
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DownloadError::Config(format!("无法创建配置目录: {}", e)))?;
        }
        let config_content = toml::to_string_pretty(self)
            .map_err(|e| DownloadError::Config(format!("无法序列化配置: {}", e)))?;
        let full_content = format!("{}\n{}", Config::generate_tutorial_content(), config_content);
        fs::write(path, full_content)
            .map_err(|e| DownloadError::Config(format!("无法写入配置文件: {}", e)))?;
        Ok(())
    }

    /// 生成配置文件教程内容
    fn generate_tutorial_content() -> String {
        r#"# galadown 配置文件
# ====================
#
# TOML 格式。命令行参数会覆盖这里的设置，优先级：命令行 > 配置文件 > 默认值
#
# 使用示例：
#   galadown https://cdn.example.com/setup_game.exe
#   galadown -j 2 -l 1048576 https://cdn.example.com/setup_game.exe
#   galadown -p 9 -d /games https://cdn.example.com/patch_1.2.bin
#
# ==================== 下载设置 ====================
#
# download_dir              默认下载目录，支持相对路径和绝对路径
# max_concurrent_downloads  同时进行的下载任务数，修改后立即生效
# speed_limit_bytes_per_sec 单任务限速（字节/秒），0 表示不限速
#                           示例：1048576 = 1MB/s
# default_priority          任务默认优先级（0-10，越大越先下载）
#
# ==================== 网络设置 ====================
#
# timeout                   连接和等待响应头的超时（秒）
# read_timeout              读取响应体时单次等待的超时（秒），建议不超过 60
# user_agent                User-Agent 字符串
#
# ==================== 重试设置 ====================
#
# retry_count               网络类失败的自动重试次数，0 表示只手动重试
# retry_delay               第一次重试前的等待时间（秒）
# retry_max_delay           重试延迟上限（秒，指数退避）
#
# 每次重试都会产生一个新的任务ID，已下载的 .partial 数据会被继续使用。
#
# ==================== 启动设置 ====================
#
# state_file                任务记录文件，留空则不保存
# auto_resume_on_startup    启动时自动恢复上次未完成的下载
#
# ==================== 故障排除 ====================
#
# 问题：下载经常失败
# 解决：增大 retry_count 或 read_timeout
#
# 问题：下载占满带宽
# 解决：设置 speed_limit_bytes_per_sec 或减少 max_concurrent_downloads
"#
        .to_string()
    }

    /// 校验配置合法性
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.max_concurrent_downloads == 0 {
            return Err(DownloadError::Config("并发下载数必须大于0".to_string()));
        }
        if self.timeout == 0 {
            return Err(DownloadError::Config("超时时间必须大于0".to_string()));
        }
        if self.read_timeout == 0 {
            return Err(DownloadError::Config("读取超时必须大于0".to_string()));
        }
        if self.download_dir.trim().is_empty() {
            return Err(DownloadError::Config("下载目录不能为空".to_string()));
        }
        if self.retry_max_delay < self.retry_delay {
            return Err(DownloadError::Config("最大重试延迟不能小于重试延迟".to_string()));
        }
        Ok(())
    }

    /// 合并命令行参数到配置
    pub fn merge_from_args(&mut self, args: &crate::cli::Args) {
        if let Some(speed_limit) = args.speed_limit {
            self.speed_limit_bytes_per_sec = speed_limit;
        }
        if let Some(dir) = &args.download_dir {
            self.download_dir = dir.clone();
        }
        if let Some(concurrency) = args.concurrency {
            self.max_concurrent_downloads = concurrency;
        }
        if let Some(priority) = args.priority {
            self.default_priority = priority;
        }
        if args.no_retry {
            self.retry_count = 0;
        }
    }

    /// 获取配置摘要信息
    pub fn get_summary(&self) -> String {
        format!(
            "配置摘要:\n\
            - 下载目录: {}\n\
            - 并发数: {}\n\
            - 速度限制: {}\n\
            - 超时时间: {} 秒 (读取 {} 秒)\n\
            - 默认优先级: {}\n\
            - 自动重试: {} 次\n\
            - 启动恢复: {}",
            self.download_dir,
            self.max_concurrent_downloads,
            if self.speed_limit_bytes_per_sec == 0 {
                "不限速".to_string()
            } else {
                format!("{} B/s", self.speed_limit_bytes_per_sec)
            },
            self.timeout,
            self.read_timeout,
            self.default_priority,
            self.retry_count,
            if self.auto_resume_on_startup { "启用" } else { "禁用" }
        )
    }
}

/// 下载引擎在运行时读取的设置。每次调度/每个块都会重新读取，不做缓存。
pub trait ConfigProvider: Send + Sync {
    fn concurrency_limit(&self) -> usize;
    fn speed_limit_bytes_per_sec(&self) -> u64;
    fn read_timeout(&self) -> Duration;
}

/// 可在运行时修改的共享配置
#[derive(Clone, Debug, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<Config>>,
}

impl SharedConfig {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn snapshot(&self) -> Config {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<F: FnOnce(&mut Config)>(&self, f: F) {
        match self.inner.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    fn read<T>(&self, f: impl FnOnce(&Config) -> T) -> T {
        match self.inner.read() {
            Ok(guard) => f(&guard),
            Err(poisoned) => f(&poisoned.into_inner()),
        }
    }
}

impl ConfigProvider for SharedConfig {
    fn concurrency_limit(&self) -> usize {
        self.read(|c| c.max_concurrent_downloads)
    }

    fn speed_limit_bytes_per_sec(&self) -> u64 {
        self.read(|c| c.speed_limit_bytes_per_sec)
    }

    fn read_timeout(&self) -> Duration {
        self.read(|c| Duration::from_secs(c.read_timeout.max(1)))
    }
}
