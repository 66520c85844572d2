//! Core: 下载管理器、调度队列、执行槽位、事件总线和错误处理等核心逻辑模块

pub mod error;
pub mod events;
pub mod ledger;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

// 只导出主流程和其它模块实际用到的类型
pub use error::{DownloadError, FailureKind, FailureReason};
pub use events::{EventBus, EventKind, SubscriptionId, TransferEvent};
pub use ledger::Ledger;
pub use manager::{
    CancelTransfer, ControlOutcome, Dispatch, DownloadManagerActor, EvictTransfer, FindByItem,
    ListActive, ListAll, PauseTransfer, QueryTransfer, ResumeTransfer, RetryTransfer, Shutdown,
    SubmitTransfer,
};
pub use retry::RetryPolicy;
