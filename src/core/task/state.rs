use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::core::error::FailureReason;
use crate::core::task::util::partial_path_for;

pub type TransferId = Uuid;

/// 未指定优先级时的默认值（0..=10 的中间值）
pub const DEFAULT_PRIORITY: i32 = 5;

/// 下载任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    Queued,
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    /// Failed 对描述符本身是终态，只能通过 retry 派生新任务
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

/// 传输内容类型，仅用于展示和关联
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferKind {
    #[default]
    Installer,
    Dlc,
    Update,
    Patch,
    Thumbnail,
    Icon,
    Other,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Installer => "installer",
            TransferKind::Dlc => "dlc",
            TransferKind::Update => "update",
            TransferKind::Patch => "patch",
            TransferKind::Thumbnail => "thumbnail",
            TransferKind::Icon => "icon",
            TransferKind::Other => "other",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "installer" => Ok(TransferKind::Installer),
            "dlc" => Ok(TransferKind::Dlc),
            "update" => Ok(TransferKind::Update),
            "patch" => Ok(TransferKind::Patch),
            "thumbnail" => Ok(TransferKind::Thumbnail),
            "icon" => Ok(TransferKind::Icon),
            "other" => Ok(TransferKind::Other),
            other => Err(format!("未知的文件类型: {}", other)),
        }
    }
}

/// 提交下载时的请求参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub url: String,
    pub destination: PathBuf,
    pub kind: TransferKind,
    /// 关联的库条目（游戏/DLC），对下载引擎不透明
    pub item_ref: Option<String>,
    /// 链接提供方给出的 SHA-256，可在提交时预先指定
    pub expected_sha256: Option<String>,
}

impl TransferRequest {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            kind: TransferKind::default(),
            item_ref: None,
            expected_sha256: None,
        }
    }

    pub fn with_kind(mut self, kind: TransferKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_item_ref(mut self, item_ref: impl Into<String>) -> Self {
        self.item_ref = Some(item_ref.into());
        self
    }

    pub fn with_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into());
        self
    }
}

/// 单个文件传输的描述符：不可变的身份信息 + 可变的进度状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferDescriptor {
    pub id: TransferId,
    pub request: TransferRequest,
    pub priority: i32,
    pub status: TransferStatus,
    /// 0 表示在拿到响应头之前大小未知
    pub total_size: u64,
    pub bytes_transferred: u64,
    /// 平滑后的速度（B/s）
    pub speed_bps: u64,
    pub eta_seconds: Option<u64>,
    pub error: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// 由哪个失败任务重试而来
    pub retry_of: Option<TransferId>,
    /// 重试后派生的新任务
    pub retried_by: Option<TransferId>,
    /// 下次执行时是否允许从 .partial 续传
    #[serde(default)]
    pub resume_allowed: bool,
}

impl TransferDescriptor {
    pub fn new(request: TransferRequest, priority: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            request,
            priority,
            status: TransferStatus::Queued,
            total_size: 0,
            bytes_transferred: 0,
            speed_bps: 0,
            eta_seconds: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            retry_of: None,
            retried_by: None,
            resume_allowed: false,
        }
    }

    /// 为失败任务创建重试后继：新 id，相同 url/目标/类型，沿用 .partial
    pub fn successor(&self) -> Self {
        let mut next = Self::new(self.request.clone(), self.priority);
        next.total_size = self.total_size;
        next.retry_of = Some(self.id);
        next.resume_allowed = true;
        next
    }

    pub fn url(&self) -> &str {
        &self.request.url
    }

    pub fn destination(&self) -> &Path {
        &self.request.destination
    }

    pub fn partial_path(&self) -> PathBuf {
        partial_path_for(&self.request.destination)
    }

    pub fn can_pause(&self) -> bool {
        self.status == TransferStatus::Active
    }

    pub fn can_resume(&self) -> bool {
        match self.status {
            TransferStatus::Paused => true,
            TransferStatus::Failed => self.bytes_transferred > 0 && self.retried_by.is_none(),
            _ => false,
        }
    }

    pub fn can_cancel(&self) -> bool {
        matches!(
            self.status,
            TransferStatus::Queued | TransferStatus::Active | TransferStatus::Paused
        )
    }

    pub fn can_retry(&self) -> bool {
        self.status == TransferStatus::Failed && self.retried_by.is_none()
    }

    pub fn progress_percent(&self) -> f32 {
        if self.total_size == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.total_size as f64 * 100.0) as f32
    }

    pub fn remaining_bytes(&self) -> Option<u64> {
        if self.total_size == 0 {
            None
        } else {
            Some(self.total_size.saturating_sub(self.bytes_transferred))
        }
    }

    pub fn eta(&self) -> Option<Duration> {
        self.eta_seconds.map(Duration::from_secs)
    }

    /// 已用时间；未开始时为 None，结束后冻结
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - start).to_std().ok()
    }

    /// 写入新的进度采样，保持 bytes ≤ total 且单调不减
    pub fn record_progress(&mut self, bytes: u64, total: u64, speed_bps: u64) {
        if total > 0 {
            self.total_size = total;
        }
        self.bytes_transferred = if self.total_size > 0 {
            bytes.min(self.total_size)
        } else {
            bytes
        };
        self.speed_bps = speed_bps;
        self.eta_seconds = match self.remaining_bytes() {
            Some(remaining) if speed_bps > 0 => Some(remaining / speed_bps),
            _ => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> TransferDescriptor {
        TransferDescriptor::new(
            TransferRequest::new("https://cdn.example.com/setup.exe", "/tmp/games/setup.exe"),
            DEFAULT_PRIORITY,
        )
    }

    #[test]
    fn test_new_descriptor_is_queued() {
        let d = descriptor();
        assert_eq!(d.status, TransferStatus::Queued);
        assert_eq!(d.total_size, 0);
        assert_eq!(d.progress_percent(), 0.0);
        assert!(d.error.is_none());
        assert_eq!(d.partial_path(), PathBuf::from("/tmp/games/setup.exe.partial"));
    }

    #[test]
    fn test_record_progress_computes_eta() {
        let mut d = descriptor();
        d.record_progress(2_000_000, 10_000_000, 1_000_000);
        assert_eq!(d.bytes_transferred, 2_000_000);
        assert_eq!(d.eta_seconds, Some(8));
        assert!((d.progress_percent() - 20.0).abs() < 0.01);

        // 超出总大小的采样被截断
        d.record_progress(12_000_000, 0, 0);
        assert_eq!(d.bytes_transferred, 10_000_000);
        assert_eq!(d.eta_seconds, None);
    }

    #[test]
    fn test_successor_keeps_identity_inputs() {
        let mut failed = descriptor();
        failed.status = TransferStatus::Failed;
        failed.total_size = 500;
        let next = failed.successor();
        assert_ne!(next.id, failed.id);
        assert_eq!(next.request, failed.request);
        assert_eq!(next.retry_of, Some(failed.id));
        assert_eq!(next.status, TransferStatus::Queued);
        assert!(next.resume_allowed);
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("DLC".parse::<TransferKind>(), Ok(TransferKind::Dlc));
        assert_eq!(TransferKind::Patch.to_string(), "patch");
        assert!("movie".parse::<TransferKind>().is_err());
    }

    #[test]
    fn test_control_predicates() {
        let mut d = descriptor();
        assert!(d.can_cancel());
        assert!(!d.can_pause());
        d.status = TransferStatus::Active;
        assert!(d.can_pause());
        d.status = TransferStatus::Failed;
        assert!(!d.can_resume());
        d.bytes_transferred = 10;
        assert!(d.can_resume());
        assert!(d.can_retry());
        d.retried_by = Some(Uuid::new_v4());
        assert!(!d.can_retry());
        assert!(!d.can_resume());
        d.status = TransferStatus::Completed;
        assert!(!d.can_cancel());
        assert!(d.status.is_terminal());
    }
}
