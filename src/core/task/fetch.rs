use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::LocalBoxStream;
use futures::{StreamExt, TryStreamExt};
use std::time::Duration;

use crate::core::error::DownloadError;

const BODY_DEADLINE: Duration = Duration::from_secs(30 * 24 * 3600);

/// 单次 GET 请求；range_start 为 Some 时发起 `Range: bytes=<start>-`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub range_start: Option<u64>,
    pub headers: Vec<(String, String)>,
}

/// `Content-Range: bytes <start>-<end>/<total>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub end: u64,
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.trim().strip_prefix("bytes")?.trim_start();
        let (span, total) = rest.split_once('/')?;
        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse().ok()?),
        };
        let (start, end) = span.trim().split_once('-')?;
        Some(Self {
            start: start.trim().parse().ok()?,
            end: end.trim().parse().ok()?,
            total,
        })
    }
}

/// 响应头 + 流式响应体
pub struct FetchResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_range: Option<ContentRange>,
    pub body: LocalBoxStream<'static, Result<Bytes, DownloadError>>,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP 抓取接口，执行器只依赖这个接口
#[async_trait(?Send)]
pub trait HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, DownloadError>;
}

/// 基于 awc 的实现，必须在 actix 运行时中使用
pub struct AwcFetcher {
    client: awc::Client,
}

impl AwcFetcher {
    pub fn new(user_agent: &str, timeout: Duration) -> Self {
        let client = awc::Client::builder()
            .timeout(timeout)
            .add_default_header(("User-Agent", user_agent.to_string()))
            .finish();
        Self { client }
    }
}

fn header_u64(headers: &awc::http::header::HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

#[async_trait(?Send)]
impl HttpFetcher for AwcFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, DownloadError> {
        let mut builder = self.client.get(&request.url);
        if let Some(start) = request.range_start {
            builder = builder.insert_header(("Range", format!("bytes={}-", start)));
        }
        for (name, value) in &request.headers {
            builder = builder.insert_header((name.as_str(), value.clone()));
        }

        let response = builder.send().await.map_err(|e| match e {
            awc::error::SendRequestError::Timeout => DownloadError::Timeout,
            other => DownloadError::Network(format!("{:?}", other)),
        })?;

        // 客户端超时只管到响应头；读取超时由执行器逐块控制
        let response = response.timeout(BODY_DEADLINE);
        let headers = response.headers();
        let content_length = header_u64(headers, "content-length");
        let content_range = headers
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(ContentRange::parse);
        let status = response.status().as_u16();

        let body = response
            .map_err(|e| DownloadError::Network(format!("网络流错误: {:?}", e)))
            .boxed_local();

        Ok(FetchResponse {
            status,
            content_length,
            content_range,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range_parse() {
        assert_eq!(
            ContentRange::parse("bytes 4000000-9999999/10000000"),
            Some(ContentRange { start: 4_000_000, end: 9_999_999, total: Some(10_000_000) })
        );
        assert_eq!(
            ContentRange::parse("bytes 0-99/*"),
            Some(ContentRange { start: 0, end: 99, total: None })
        );
        assert_eq!(ContentRange::parse("items 0-1/2"), None);
        assert_eq!(ContentRange::parse("bytes */1000"), None);
    }
}
