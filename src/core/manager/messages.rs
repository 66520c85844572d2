use actix::Message;

use crate::core::error::DownloadError;
use crate::core::task::executor::{ProgressSample, TransferOutcome};
use crate::core::task::state::{TransferDescriptor, TransferId, TransferRequest, TransferStatus};

/// 控制操作的结果：不合法的状态转换不是错误，而是被忽略并告知当前状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Applied,
    Ignored(TransferStatus),
}

impl ControlOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ControlOutcome::Applied)
    }
}

/// 提交下载
pub struct SubmitTransfer {
    pub request: TransferRequest,
    pub priority: i32,
}
impl Message for SubmitTransfer { type Result = Result<TransferId, DownloadError>; }

/// 暂停（仅 Active）
pub struct PauseTransfer(pub TransferId);
impl Message for PauseTransfer { type Result = Result<ControlOutcome, DownloadError>; }

/// 恢复（Paused，或已有数据的 Failed）
pub struct ResumeTransfer(pub TransferId);
impl Message for ResumeTransfer { type Result = Result<ControlOutcome, DownloadError>; }

/// 取消并删除 .partial
pub struct CancelTransfer(pub TransferId);
impl Message for CancelTransfer { type Result = Result<ControlOutcome, DownloadError>; }

/// 为失败任务派生新任务，返回新 id
pub struct RetryTransfer(pub TransferId);
impl Message for RetryTransfer { type Result = Result<TransferId, DownloadError>; }

/// 查询描述符快照
pub struct QueryTransfer(pub TransferId);
impl Message for QueryTransfer { type Result = Option<TransferDescriptor>; }

/// 正在执行的任务
pub struct ListActive;
impl Message for ListActive { type Result = Vec<TransferDescriptor>; }

/// 所有任务，按创建时间排序
pub struct ListAll;
impl Message for ListAll { type Result = Vec<TransferDescriptor>; }

/// 按库条目查找最近的任务
pub struct FindByItem(pub String);
impl Message for FindByItem { type Result = Option<TransferDescriptor>; }

/// 移除终态任务；执行器还没退出时返回 Ok(false)
pub struct EvictTransfer(pub TransferId);
impl Message for EvictTransfer { type Result = Result<bool, DownloadError>; }

/// 立即执行一次调度，返回本次启动的任务数
pub struct Dispatch;
impl Message for Dispatch { type Result = usize; }

/// 暂停所有执行中的任务，等它们落盘后保存记录并停止管理器
pub struct Shutdown;
impl Message for Shutdown { type Result = (); }

/// 执行器上报进度（内部）
pub struct TransferProgress {
    pub id: TransferId,
    pub run: u64,
    pub sample: ProgressSample,
}
impl Message for TransferProgress { type Result = (); }

/// 执行器结束（内部）
pub struct TransferFinished {
    pub id: TransferId,
    pub run: u64,
    pub outcome: TransferOutcome,
}
impl Message for TransferFinished { type Result = (); }
