//! `task` 模块包含了与单个下载任务相关的所有逻辑
//!
//! 主要包括：
//! - `state`: 描述符 `TransferDescriptor` 和状态 `TransferStatus`
//! - `link`: 链接/凭据提供方接口
//! - `fetch`: HTTP 抓取接口和 awc 实现
//! - `executor`: 单个任务的执行器
//! - `util`: 工具类，如 `BufferManager`、`SpeedMeter`

pub mod executor;
pub mod fetch;
pub mod link;
pub mod state;
pub mod util;

// 导出核心组件，方便外部使用
pub use executor::{ProgressSample, TransferExecutor, TransferOutcome};
pub use fetch::{AwcFetcher, HttpFetcher};
pub use link::{DirectLinkProvider, LinkProvider, ResolvedLink};
pub use state::{TransferDescriptor, TransferId, TransferKind, TransferRequest, TransferStatus, DEFAULT_PRIORITY};
pub use self::util::{BufferManager, SpeedLimiter, SpeedMeter};
