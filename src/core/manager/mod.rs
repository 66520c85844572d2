//! 下载管理器：对外的控制接口 + 调度循环
//!
//! - `actor`: `DownloadManagerActor` 本体与构造
//! - `messages`: 对外消息和执行器回报消息
//! - `handlers`: submit/pause/resume/cancel/retry/query 等处理
//! - `dispatch`: 调度、执行器启动和结果落实

mod actor;
mod dispatch;
mod handlers;
mod messages;

pub use actor::{DownloadManagerActor, DISPATCH_TICK};
pub use messages::{
    CancelTransfer, ControlOutcome, Dispatch, EvictTransfer, FindByItem, ListActive, ListAll,
    PauseTransfer, QueryTransfer, ResumeTransfer, RetryTransfer, Shutdown, SubmitTransfer,
    TransferFinished, TransferProgress,
};
