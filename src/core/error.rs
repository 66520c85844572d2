use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

use crate::core::task::state::{TransferId, TransferStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("参数无效: {0}")]
    Validation(String),

    #[error("需要登录: {0}")]
    AuthRequired(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("HTTP 状态异常: {0}")]
    HttpStatus(u16),

    #[error("读取超时")]
    Timeout,

    #[error("文件大小不匹配: 预期 {expected} 字节, 实际 {actual} 字节")]
    SizeMismatch {
        expected: u64,
        actual: u64,
    },

    #[error("校验和不匹配: 预期 {expected}, 实际 {actual}")]
    ChecksumMismatch {
        expected: String,
        actual: String,
    },

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("无法完成文件: {0}")]
    Finalize(String),

    #[error("任务ID不存在: {0}")]
    NotFound(TransferId),

    #[error("任务 {id} 处于 {status:?} 状态, 不能执行 {action}")]
    InvalidTransition {
        id: TransferId,
        status: TransferStatus,
        action: &'static str,
    },

    #[error("配置错误: {0}")]
    Config(String),

    #[error("未知错误: {0}")]
    Unknown(String),
}

impl DownloadError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DownloadError::Network(_) | DownloadError::Timeout | DownloadError::HttpStatus(_)
        )
    }

    /// 活动传输期间的错误归入的失败类别。
    /// 校验、查询类错误不会出现在 Failed 描述符上，这里统一按存储处理。
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            DownloadError::AuthRequired(_) => FailureKind::Auth,
            DownloadError::Network(_) | DownloadError::HttpStatus(_) | DownloadError::Timeout => {
                FailureKind::Network
            }
            DownloadError::SizeMismatch { .. } | DownloadError::ChecksumMismatch { .. } => {
                FailureKind::Integrity
            }
            DownloadError::Finalize(_) => FailureKind::Finalize,
            _ => FailureKind::Storage,
        }
    }

    pub fn into_failure(self) -> FailureReason {
        FailureReason {
            kind: self.failure_kind(),
            message: self.to_string(),
        }
    }
}

impl From<io::Error> for DownloadError {
    fn from(error: io::Error) -> Self {
        DownloadError::Storage(error.to_string())
    }
}

impl From<String> for DownloadError {
    fn from(error: String) -> Self {
        DownloadError::Unknown(error)
    }
}

impl From<&str> for DownloadError {
    fn from(error: &str) -> Self {
        DownloadError::Unknown(error.to_string())
    }
}

/// 失败原因分类，对外暴露为原因字符串
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Auth,
    Network,
    Integrity,
    Storage,
    Finalize,
}

impl FailureKind {
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::Auth => "auth",
            FailureKind::Network => "network",
            FailureKind::Integrity => "integrity",
            FailureKind::Storage => "storage",
            FailureKind::Finalize => "finalize",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Network)
    }
}

/// Failed 状态携带的错误详情
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(DownloadError::Network("connection reset".to_string()).is_retryable());
        assert!(DownloadError::Timeout.is_retryable());
        assert!(DownloadError::HttpStatus(503).is_retryable());
        assert!(!DownloadError::AuthRequired("no token".to_string()).is_retryable());
        assert!(!DownloadError::SizeMismatch { expected: 10, actual: 5 }.is_retryable());
    }

    #[test]
    fn test_failure_kind_codes() {
        assert_eq!(DownloadError::AuthRequired("x".into()).failure_kind().code(), "auth");
        assert_eq!(DownloadError::HttpStatus(404).failure_kind().code(), "network");
        assert_eq!(DownloadError::Timeout.failure_kind().code(), "network");
        assert_eq!(
            DownloadError::ChecksumMismatch { expected: "a".into(), actual: "b".into() }
                .failure_kind()
                .code(),
            "integrity"
        );
        assert_eq!(DownloadError::Storage("disk full".into()).failure_kind().code(), "storage");
        assert_eq!(DownloadError::Finalize("rename".into()).failure_kind().code(), "finalize");
    }

    #[test]
    fn test_error_conversion() {
        let error: DownloadError = "测试错误".into();
        assert!(matches!(error, DownloadError::Unknown(_)));

        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let error: DownloadError = io_error.into();
        assert!(matches!(error, DownloadError::Storage(_)));
    }

    #[test]
    fn test_into_failure_keeps_message() {
        let reason = DownloadError::HttpStatus(500).into_failure();
        assert_eq!(reason.kind, FailureKind::Network);
        assert!(reason.message.contains("500"));
        assert!(reason.to_string().starts_with("network: "));
    }
}
