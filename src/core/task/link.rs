use async_trait::async_trait;
use std::sync::RwLock;

use crate::core::error::DownloadError;
use crate::core::task::state::TransferDescriptor;

/// 可直接抓取的下载地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
    pub url: String,
    /// 0 表示未知
    pub expected_size: u64,
    pub expected_sha256: Option<String>,
    /// 请求时需要附带的头（例如 Authorization）
    pub headers: Vec<(String, String)>,
}

impl ResolvedLink {
    pub fn direct(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            expected_size: 0,
            expected_sha256: None,
            headers: Vec::new(),
        }
    }
}

/// 凭据/链接提供方：把描述符的逻辑目标换成可抓取的 URL，必要时刷新令牌。
/// 没有可用凭据时返回 `DownloadError::AuthRequired`。
#[async_trait(?Send)]
pub trait LinkProvider {
    async fn resolve(&self, descriptor: &TransferDescriptor) -> Result<ResolvedLink, DownloadError>;
}

/// 直接使用描述符中的 URL，可选附带 Bearer 令牌
pub struct DirectLinkProvider {
    token: RwLock<Option<String>>,
    require_token: bool,
}

impl DirectLinkProvider {
    /// 不需要登录的公开地址
    pub fn anonymous() -> Self {
        Self {
            token: RwLock::new(None),
            require_token: false,
        }
    }

    /// 需要令牌的地址；令牌缺失时解析失败
    pub fn with_token(token: Option<String>) -> Self {
        Self {
            token: RwLock::new(token.filter(|t| !t.trim().is_empty())),
            require_token: true,
        }
    }

    /// 外部认证流程刷新令牌后写入
    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token.filter(|t| !t.trim().is_empty());
        }
    }
}

#[async_trait(?Send)]
impl LinkProvider for DirectLinkProvider {
    async fn resolve(&self, descriptor: &TransferDescriptor) -> Result<ResolvedLink, DownloadError> {
        let token = self
            .token
            .read()
            .map_err(|_| DownloadError::Unknown("令牌锁已损坏".to_string()))?
            .clone();

        let mut link = ResolvedLink::direct(descriptor.url());
        link.expected_size = descriptor.total_size;
        link.expected_sha256 = descriptor.request.expected_sha256.clone();

        match token {
            Some(token) => {
                link.headers
                    .push(("Authorization".to_string(), format!("Bearer {}", token)));
            }
            None if self.require_token => {
                return Err(DownloadError::AuthRequired("没有可用的访问令牌".to_string()));
            }
            None => {}
        }
        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::state::{TransferRequest, DEFAULT_PRIORITY};
    use tokio_test::{assert_err, assert_ok};

    fn descriptor() -> TransferDescriptor {
        TransferDescriptor::new(
            TransferRequest::new("https://cdn.example.com/a.bin", "/tmp/a.bin").with_sha256("abcd"),
            DEFAULT_PRIORITY,
        )
    }

    #[actix_rt::test]
    async fn test_anonymous_passes_url_through() {
        let provider = DirectLinkProvider::anonymous();
        let link = assert_ok!(provider.resolve(&descriptor()).await);
        assert_eq!(link.url, "https://cdn.example.com/a.bin");
        assert_eq!(link.expected_sha256.as_deref(), Some("abcd"));
        assert!(link.headers.is_empty());
    }

    #[actix_rt::test]
    async fn test_missing_token_is_auth_required() {
        let provider = DirectLinkProvider::with_token(None);
        let err = assert_err!(provider.resolve(&descriptor()).await);
        assert!(matches!(err, DownloadError::AuthRequired(_)));

        provider.set_token(Some("t0k3n".to_string()));
        let link = assert_ok!(provider.resolve(&descriptor()).await);
        assert_eq!(
            link.headers,
            vec![("Authorization".to_string(), "Bearer t0k3n".to_string())]
        );
    }
}
