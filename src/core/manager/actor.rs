use actix::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use crate::config::ConfigProvider;
use crate::core::events::{EventBus, EventKind, TransferEvent};
use crate::core::ledger::{self, Ledger};
use crate::core::pool::WorkerPool;
use crate::core::queue::TransferQueue;
use crate::core::task::executor::TransferExecutor;
use crate::core::task::fetch::HttpFetcher;
use crate::core::task::link::LinkProvider;
use crate::core::task::state::{TransferDescriptor, TransferId, TransferStatus};

/// 兜底调度的间隔
pub const DISPATCH_TICK: Duration = Duration::from_secs(1);

/// 下载管理器 Actor。
/// 描述符表、优先队列、执行槽位都只在这里修改，所有操作按消息串行处理。
pub struct DownloadManagerActor {
    pub(super) settings: Arc<dyn ConfigProvider>,
    pub(super) executor: TransferExecutor,
    pub(super) events: EventBus,
    pub(super) ledger: Option<Ledger>,
    pub(super) descriptors: HashMap<TransferId, TransferDescriptor>,
    pub(super) queue: TransferQueue,
    pub(super) pool: WorkerPool,
    /// 每个任务最近一次发事件的时间，用于心跳
    pub(super) last_event: HashMap<TransferId, Instant>,
    pub(super) shutting_down: bool,
    pub(super) shutdown_waiters: Vec<oneshot::Sender<()>>,
}

impl DownloadManagerActor {
    pub fn new(
        settings: Arc<dyn ConfigProvider>,
        links: Rc<dyn LinkProvider>,
        fetcher: Rc<dyn HttpFetcher>,
        events: EventBus,
    ) -> Self {
        let executor = TransferExecutor::new(links, fetcher, settings.clone());
        Self {
            settings,
            executor,
            events,
            ledger: None,
            descriptors: HashMap::new(),
            queue: TransferQueue::new(),
            pool: WorkerPool::new(),
            last_event: HashMap::new(),
            shutting_down: false,
            shutdown_waiters: Vec::new(),
        }
    }

    /// 挂上任务记录文件并恢复上次的任务；记录损坏时从空表开始
    pub fn with_ledger(mut self, ledger: Ledger, auto_resume: bool) -> Self {
        match ledger.load() {
            Ok(records) => {
                let mut restored = ledger::restore(records, auto_resume);
                restored.sort_by_key(|d| d.created_at);
                log::info!("从 {:?} 恢复了 {} 个任务", ledger.path(), restored.len());
                for descriptor in restored {
                    if descriptor.status == TransferStatus::Queued {
                        self.queue.push(descriptor.id, descriptor.priority);
                    }
                    self.descriptors.insert(descriptor.id, descriptor);
                }
            }
            Err(e) => log::warn!("无法读取任务记录，忽略: {}", e),
        }
        self.ledger = Some(ledger);
        self
    }

    pub(super) fn publish(&mut self, kind: EventKind, id: &TransferId) {
        if let Some(descriptor) = self.descriptors.get(id) {
            self.events.publish(TransferEvent::new(kind, descriptor));
            self.last_event.insert(*id, Instant::now());
        }
    }

    /// 生命周期变化后写一次记录
    pub(super) fn persist(&self) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.save(self.descriptors.values()) {
                log::warn!("保存任务记录失败: {}", e);
            }
        }
    }

    /// 活动任务超过心跳间隔没有进度事件时补发一次
    pub(super) fn heartbeat(&mut self, interval: Duration) {
        let now = Instant::now();
        let stale: Vec<TransferId> = self
            .pool
            .running_ids()
            .into_iter()
            .filter(|id| {
                self.descriptors.get(id).map(|d| d.status) == Some(TransferStatus::Active)
                    && self
                        .last_event
                        .get(id)
                        .map(|t| now.saturating_duration_since(*t) >= interval)
                        .unwrap_or(true)
            })
            .collect();
        for id in stale {
            self.publish(EventKind::Progress, &id);
        }
    }

    /// 所有执行器都退出后完成关闭
    pub(super) fn finish_shutdown(&mut self, ctx: &mut Context<Self>) {
        self.persist();
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(());
        }
        log::info!("下载管理器已停止");
        ctx.stop();
    }
}

pub(super) fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("已删除 {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("无法删除 {:?}: {}", path, e),
    }
}

impl Actor for DownloadManagerActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        log::info!("下载管理器启动，并发上限 {}", self.settings.concurrency_limit());
        self.dispatch(ctx);
        ctx.run_interval(DISPATCH_TICK, |act, ctx| {
            act.dispatch(ctx);
            act.heartbeat(crate::core::task::util::PROGRESS_HEARTBEAT);
        });
    }
}
