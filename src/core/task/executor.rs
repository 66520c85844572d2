use futures::StreamExt;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout};

use crate::config::ConfigProvider;
use crate::core::error::{DownloadError, FailureReason};
use crate::core::pool::StopSignal;
use crate::core::task::fetch::{FetchRequest, FetchResponse, HttpFetcher};
use crate::core::task::link::{LinkProvider, ResolvedLink};
use crate::core::task::state::TransferDescriptor;
use crate::core::task::util::{
    sha256_file, BufferManager, ProgressClock, SpeedLimiter, SpeedMeter, DOWNLOAD_CHUNK_SIZE,
    PROGRESS_INTERVAL,
};

/// 执行器上报的进度采样；publish 为 false 时只更新描述符，不发事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub bytes_transferred: u64,
    pub total_size: u64,
    pub speed_bps: u64,
    pub publish: bool,
}

/// 一次执行的结果
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Completed { bytes: u64, total: u64 },
    Failed { reason: FailureReason, bytes_on_disk: u64, total: u64 },
    /// 收到停止信号（暂停/取消/退出），.partial 保持原样
    Cancelled { bytes_on_disk: u64, total: u64 },
}

enum StreamEnd {
    Exhausted,
    Stopped,
}

/// 单次运行中跟踪的量，失败时用于上报
#[derive(Default)]
struct RunState {
    total: u64,
    on_disk: u64,
}

/// 传输执行器：为一个描述符搬运字节。
/// 不做任何内部重试，所有失败都以 `TransferOutcome::Failed` 返回。
#[derive(Clone)]
pub struct TransferExecutor {
    links: Rc<dyn LinkProvider>,
    fetcher: Rc<dyn HttpFetcher>,
    settings: Arc<dyn ConfigProvider>,
}

impl TransferExecutor {
    pub fn new(
        links: Rc<dyn LinkProvider>,
        fetcher: Rc<dyn HttpFetcher>,
        settings: Arc<dyn ConfigProvider>,
    ) -> Self {
        Self {
            links,
            fetcher,
            settings,
        }
    }

    pub async fn run<F>(
        &self,
        descriptor: &TransferDescriptor,
        stop: &StopSignal,
        mut on_progress: F,
    ) -> TransferOutcome
    where
        F: FnMut(ProgressSample),
    {
        let partial = descriptor.partial_path();
        let mut state = RunState {
            total: descriptor.total_size,
            on_disk: 0,
        };

        match self
            .transfer(descriptor, stop, &partial, &mut state, &mut on_progress)
            .await
        {
            Ok(StreamEnd::Exhausted) => TransferOutcome::Completed {
                bytes: state.on_disk,
                total: state.total,
            },
            Ok(StreamEnd::Stopped) => {
                log::info!("任务 {} 在 {} 字节处停止", descriptor.id, state.on_disk);
                TransferOutcome::Cancelled {
                    bytes_on_disk: state.on_disk,
                    total: state.total,
                }
            }
            Err(error) => {
                log::error!("任务 {} 失败: {}", descriptor.id, error);
                remove_if_empty(&partial).await;
                TransferOutcome::Failed {
                    reason: error.into_failure(),
                    bytes_on_disk: state.on_disk,
                    total: state.total,
                }
            }
        }
    }

    async fn transfer<F>(
        &self,
        descriptor: &TransferDescriptor,
        stop: &StopSignal,
        partial: &Path,
        state: &mut RunState,
        on_progress: &mut F,
    ) -> Result<StreamEnd, DownloadError>
    where
        F: FnMut(ProgressSample),
    {
        if let Some(parent) = descriptor.destination().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| DownloadError::Storage(format!("无法创建目录 {:?}: {}", parent, e)))?;
            }
        }

        let mut offset = resume_offset(descriptor, partial).await?;
        state.on_disk = offset;
        if stop.is_raised() {
            return Ok(StreamEnd::Stopped);
        }

        // 没有凭据时直接失败，不发起请求
        let link = self.links.resolve(descriptor).await?;
        if link.expected_size > 0 {
            state.total = link.expected_size;
        }
        if state.total > 0 && offset > state.total {
            log::warn!("任务 {} 的 .partial 比文件还大，重新下载", descriptor.id);
            offset = 0;
        }

        // 整次运行共用一个节拍，开头和结尾的采样也受它限制
        let mut clock = ProgressClock::new(PROGRESS_INTERVAL);

        if state.total > 0 && offset == state.total {
            // 上次已经收完，只差校验和重命名
            on_progress(ProgressSample {
                bytes_transferred: offset,
                total_size: state.total,
                speed_bps: 0,
                publish: clock.should_publish(Instant::now()),
            });
            self.finalize(descriptor, &link, partial, state).await?;
            return Ok(StreamEnd::Exhausted);
        }

        let (mut response, offset) = self.open_stream(descriptor, &link, offset).await?;
        if let Some(total) = response.content_range.and_then(|r| r.total) {
            state.total = total;
        } else if let Some(length) = response.content_length {
            state.total = offset + length;
        }

        let mut buffer = BufferManager::open(partial, offset, DOWNLOAD_CHUNK_SIZE).await?;
        state.on_disk = offset;
        on_progress(ProgressSample {
            bytes_transferred: offset,
            total_size: state.total,
            speed_bps: 0,
            publish: clock.should_publish(Instant::now()),
        });

        let end = self
            .pump(&mut response, &mut buffer, stop, state, &mut clock, on_progress)
            .await;

        // 无论结果如何，已收到的数据都要落盘，留给下次续传
        let flushed = buffer.finish().await;
        match (end, flushed) {
            (Ok(end), Ok(on_disk)) => {
                state.on_disk = on_disk;
                match end {
                    StreamEnd::Stopped => Ok(StreamEnd::Stopped),
                    StreamEnd::Exhausted => {
                        if state.total == 0 {
                            state.total = on_disk;
                        }
                        self.finalize(descriptor, &link, partial, state).await?;
                        on_progress(ProgressSample {
                            bytes_transferred: state.on_disk,
                            total_size: state.total,
                            speed_bps: 0,
                            publish: clock.should_publish(Instant::now()),
                        });
                        Ok(StreamEnd::Exhausted)
                    }
                }
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), flushed) => {
                if let Ok(on_disk) = flushed {
                    state.on_disk = on_disk;
                }
                Err(e)
            }
        }
    }

    /// 发起请求；服务器不支持续传时退回到从 0 开始的完整下载
    async fn open_stream(
        &self,
        descriptor: &TransferDescriptor,
        link: &ResolvedLink,
        offset: u64,
    ) -> Result<(FetchResponse, u64), DownloadError> {
        let request = |range_start: Option<u64>| FetchRequest {
            url: link.url.clone(),
            range_start,
            headers: link.headers.clone(),
        };

        if offset == 0 {
            let response = self.fetcher.fetch(request(None)).await?;
            return ensure_success(response).map(|r| (r, 0));
        }

        let response = self.fetcher.fetch(request(Some(offset))).await?;
        match response.status {
            206 if response.content_range.map(|r| r.start) == Some(offset) => Ok((response, offset)),
            200 => {
                log::warn!("任务 {} 的服务器忽略了 Range 请求，从头下载", descriptor.id);
                Ok((response, 0))
            }
            206 | 416 => {
                log::warn!(
                    "任务 {} 的续传位置不被接受 (HTTP {})，从头下载",
                    descriptor.id,
                    response.status
                );
                drop(response);
                let response = self.fetcher.fetch(request(None)).await?;
                ensure_success(response).map(|r| (r, 0))
            }
            status => Err(DownloadError::HttpStatus(status)),
        }
    }

    /// 把响应体搬进缓冲区，每满一块落盘一次
    async fn pump<F>(
        &self,
        response: &mut FetchResponse,
        buffer: &mut BufferManager,
        stop: &StopSignal,
        state: &mut RunState,
        clock: &mut ProgressClock,
        on_progress: &mut F,
    ) -> Result<StreamEnd, DownloadError>
    where
        F: FnMut(ProgressSample),
    {
        let mut meter = SpeedMeter::new(buffer.position());
        let mut limiter = SpeedLimiter::new();

        loop {
            let read_timeout = self.settings.read_timeout();
            let next = tokio::select! {
                biased;
                _ = stop.raised() => return Ok(StreamEnd::Stopped),
                item = timeout(read_timeout, response.body.next()) => item,
            };

            let bytes = match next {
                Err(_) => return Err(DownloadError::Timeout),
                Ok(None) => return Ok(StreamEnd::Exhausted),
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(bytes))) => bytes,
            };

            let incoming = buffer.received() + bytes.len() as u64;
            if state.total > 0 && incoming > state.total {
                return Err(DownloadError::SizeMismatch {
                    expected: state.total,
                    actual: incoming,
                });
            }

            if !buffer.write(&bytes) {
                continue;
            }
            let written = buffer.flush().await?;
            state.on_disk = buffer.position();

            let now = Instant::now();
            on_progress(ProgressSample {
                bytes_transferred: state.on_disk,
                total_size: state.total,
                speed_bps: meter.sample_at(state.on_disk, now),
                publish: clock.should_publish(now),
            });

            // 检查点：块写完之后
            if stop.is_raised() {
                return Ok(StreamEnd::Stopped);
            }

            let delay = limiter.wait_if_needed(
                self.settings.speed_limit_bytes_per_sec(),
                written as u64,
            );
            if !delay.is_zero() {
                tokio::select! {
                    _ = stop.raised() => return Ok(StreamEnd::Stopped),
                    _ = sleep(delay) => {}
                }
            }
        }
    }

    /// 校验大小和哈希，然后原子重命名到目标路径
    async fn finalize(
        &self,
        descriptor: &TransferDescriptor,
        link: &ResolvedLink,
        partial: &Path,
        state: &RunState,
    ) -> Result<(), DownloadError> {
        if state.total > 0 && state.on_disk != state.total {
            return Err(DownloadError::SizeMismatch {
                expected: state.total,
                actual: state.on_disk,
            });
        }
        if link.expected_size > 0 && state.on_disk != link.expected_size {
            return Err(DownloadError::SizeMismatch {
                expected: link.expected_size,
                actual: state.on_disk,
            });
        }

        if let Some(expected) = &link.expected_sha256 {
            let path = partial.to_path_buf();
            let actual = tokio::task::spawn_blocking(move || sha256_file(&path))
                .await
                .map_err(|e| DownloadError::Unknown(format!("校验任务异常: {}", e)))??;
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(DownloadError::ChecksumMismatch {
                    expected: expected.to_lowercase(),
                    actual,
                });
            }
        }

        tokio::fs::rename(partial, descriptor.destination())
            .await
            .map_err(|e| DownloadError::Finalize(format!("{:?}: {}", descriptor.destination(), e)))?;
        log::info!("任务 {} 下载完成: {:?}", descriptor.id, descriptor.destination());
        Ok(())
    }
}

fn ensure_success(response: FetchResponse) -> Result<FetchResponse, DownloadError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(DownloadError::HttpStatus(response.status))
    }
}

/// 允许续传时以 .partial 的长度为准，否则清空旧的 .partial
async fn resume_offset(descriptor: &TransferDescriptor, partial: &Path) -> Result<u64, DownloadError> {
    match tokio::fs::metadata(partial).await {
        Ok(meta) if descriptor.resume_allowed => Ok(meta.len()),
        Ok(_) => {
            tokio::fs::File::create(partial).await?;
            Ok(0)
        }
        Err(_) => Ok(0),
    }
}

async fn remove_if_empty(partial: &Path) {
    if let Ok(meta) = tokio::fs::metadata(partial).await {
        if meta.len() == 0 {
            if let Err(e) = tokio::fs::remove_file(partial).await {
                log::warn!("无法删除空的 .partial {:?}: {}", partial, e);
            }
        }
    }
}
