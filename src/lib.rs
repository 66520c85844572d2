//! galadown: 游戏安装包、补丁、DLC 和图片资源的下载引擎
//!
//! - `core`: 下载管理器 actor、优先队列、执行器、事件总线
//! - `config`: 配置文件和运行时可修改的设置
//! - `cli` / `ui`: 命令行参数和终端进度显示
//! - `utils`: 日志和参数校验

pub mod cli;
pub mod config;
pub mod core;
pub mod ui;
pub mod utils;

pub use crate::config::{Config, ConfigProvider, SharedConfig};
pub use crate::core::{DownloadError, DownloadManagerActor, EventBus, TransferEvent};
