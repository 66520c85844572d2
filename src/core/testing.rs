//! 测试用的内存 HTTP 服务和设置

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConfigProvider;
use crate::core::error::DownloadError;
use crate::core::task::fetch::{ContentRange, FetchRequest, FetchResponse, HttpFetcher};

const MOCK_CHUNK: usize = 64 * 1024;

/// 可复现的测试数据
pub fn sample_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

/// 一个 URL 的响应行为
#[derive(Clone)]
pub struct MockRoute {
    data: Rc<Vec<u8>>,
    honor_range: bool,
    send_length: bool,
    status: Option<u16>,
    fail_at: Option<u64>,
    /// 只生效一次：第一次越过这个位置后响应体挂起
    stall_at: Rc<RefCell<Option<u64>>>,
}

impl MockRoute {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Rc::new(data),
            honor_range: true,
            send_length: true,
            status: None,
            fail_at: None,
            stall_at: Rc::new(RefCell::new(None)),
        }
    }

    pub fn ignore_range(mut self) -> Self {
        self.honor_range = false;
        self
    }

    pub fn without_length(mut self) -> Self {
        self.send_length = false;
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn fail_at(mut self, offset: u64) -> Self {
        self.fail_at = Some(offset);
        self
    }

    pub fn stall_at(self, offset: u64) -> Self {
        *self.stall_at.borrow_mut() = Some(offset);
        self
    }
}

/// 按 URL 路由的内存 HTTP 抓取器，记录每次请求
#[derive(Default)]
pub struct MockFetcher {
    routes: RefCell<HashMap<String, MockRoute>>,
    requests: RefCell<Vec<FetchRequest>>,
    stalled: Arc<AtomicBool>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, url: &str, route: MockRoute) {
        self.routes.borrow_mut().insert(url.to_string(), route);
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.borrow().clone()
    }

    pub fn requests_for(&self, url: &str) -> Vec<FetchRequest> {
        self.requests
            .borrow()
            .iter()
            .filter(|r| r.url == url)
            .cloned()
            .collect()
    }

    /// 等到某个响应体挂起
    pub async fn wait_stalled(&self) {
        for _ in 0..500 {
            if self.stalled.swap(false, Ordering::SeqCst) {
                return;
            }
            actix_rt::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no response body stalled in time");
    }
}

#[async_trait(?Send)]
impl HttpFetcher for MockFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, DownloadError> {
        self.requests.borrow_mut().push(request.clone());
        let route = self
            .routes
            .borrow()
            .get(&request.url)
            .cloned()
            .ok_or_else(|| DownloadError::Network(format!("no route for {}", request.url)))?;

        let len = route.data.len() as u64;
        if let Some(status) = route.status {
            return Ok(FetchResponse {
                status,
                content_length: Some(0),
                content_range: None,
                body: stream::empty().boxed_local(),
            });
        }

        let (status, start, content_range) = match request.range_start {
            Some(start) if route.honor_range && start >= len => {
                return Ok(FetchResponse {
                    status: 416,
                    content_length: Some(0),
                    content_range: None,
                    body: stream::empty().boxed_local(),
                });
            }
            Some(start) if route.honor_range => (
                206,
                start,
                Some(ContentRange {
                    start,
                    end: len - 1,
                    total: Some(len),
                }),
            ),
            _ => (200, 0, None),
        };

        let stall = route.stall_at.borrow_mut().take().filter(|s| *s > start);
        let end = [stall, route.fail_at, Some(len)]
            .into_iter()
            .flatten()
            .filter(|e| *e >= start)
            .min()
            .unwrap_or(len);

        let chunks: Vec<Result<Bytes, DownloadError>> = route.data[start as usize..end as usize]
            .chunks(MOCK_CHUNK)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let mut body = stream::iter(chunks).boxed_local();

        if stall == Some(end) {
            let flag = self.stalled.clone();
            let tail = stream::once(async move {
                flag.store(true, Ordering::SeqCst);
            })
            .filter_map(|_| async { None::<Result<Bytes, DownloadError>> })
            .chain(stream::pending());
            body = body.chain(tail).boxed_local();
        } else if route.fail_at == Some(end) && end < len {
            body = body
                .chain(stream::once(async {
                    Err(DownloadError::Network("connection reset".to_string()))
                }))
                .boxed_local();
        }

        Ok(FetchResponse {
            status,
            content_length: route.send_length.then(|| len - start),
            content_range,
            body,
        })
    }
}

/// 可在测试中随时修改的设置
pub struct TestSettings {
    limit: AtomicUsize,
    speed: AtomicU64,
    read_timeout: Duration,
}

impl TestSettings {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            speed: AtomicU64::new(0),
            read_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::SeqCst);
    }

    pub fn set_speed_limit(&self, bytes_per_sec: u64) {
        self.speed.store(bytes_per_sec, Ordering::SeqCst);
    }
}

impl ConfigProvider for TestSettings {
    fn concurrency_limit(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
    }

    fn speed_limit_bytes_per_sec(&self) -> u64 {
        self.speed.load(Ordering::SeqCst)
    }

    fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}
