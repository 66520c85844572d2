use actix::prelude::*;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;

use super::actor::{remove_partial, DownloadManagerActor};
use super::messages::{TransferFinished, TransferProgress};
use crate::core::events::EventKind;
use crate::core::pool::StopSignal;
use crate::core::task::executor::TransferOutcome;
use crate::core::task::state::{TransferDescriptor, TransferId, TransferStatus};

impl DownloadManagerActor {
    /// 在并发上限内把队列头部的任务转为 Active 并启动执行器。
    /// 上限每一轮都重新读取。
    pub(super) fn dispatch(&mut self, ctx: &mut Context<Self>) -> usize {
        if self.shutting_down {
            return 0;
        }

        let mut admitted = 0;
        let mut deferred = Vec::new();
        while self.pool.has_capacity(self.settings.concurrency_limit()) {
            let entry = match self.queue.pop() {
                Some(entry) => entry,
                None => break,
            };
            let queued = self
                .descriptors
                .get(&entry.id)
                .map(|d| d.status == TransferStatus::Queued)
                .unwrap_or(false);
            if !queued {
                // 已取消或已移除的过期条目
                continue;
            }
            let draining = self
                .descriptors
                .get(&entry.id)
                .map(|d| self.partial_in_use(d.destination(), &entry.id))
                .unwrap_or(false);
            if draining {
                // 同一目标的上一次执行还没退出，等它结束后再调度
                log::debug!("任务 {} 的目标文件仍被占用，延后调度", entry.id);
                deferred.push(entry);
                continue;
            }
            let (run, stop) = match self.pool.occupy(entry.id) {
                Some(slot) => slot,
                None => {
                    log::warn!("任务 {} 的上一次执行还未退出，稍后再调度", entry.id);
                    deferred.push(entry);
                    continue;
                }
            };

            let snapshot = match self.descriptors.get_mut(&entry.id) {
                Some(descriptor) => {
                    descriptor.status = TransferStatus::Active;
                    descriptor.started_at = Some(Utc::now());
                    descriptor.ended_at = None;
                    descriptor.speed_bps = 0;
                    descriptor.eta_seconds = None;
                    descriptor.clone()
                }
                None => continue,
            };
            log::debug!(
                "调度任务 {} (优先级 {}, 序号 {})",
                entry.id,
                entry.priority,
                entry.seq
            );
            self.publish(EventKind::Active, &entry.id);
            self.launch(ctx, snapshot, run, stop);
            admitted += 1;
        }

        for entry in deferred {
            self.queue.push(entry.id, entry.priority);
        }
        if admitted > 0 {
            self.persist();
        }
        admitted
    }

    /// 另一个执行器还持有同一目标的 .partial
    pub(super) fn partial_in_use(&self, destination: &Path, id: &TransferId) -> bool {
        self.descriptors.values().any(|d| {
            d.id != *id && d.request.destination == destination && self.pool.is_running(&d.id)
        })
    }

    fn launch(
        &self,
        ctx: &mut Context<Self>,
        descriptor: TransferDescriptor,
        run: u64,
        stop: Arc<StopSignal>,
    ) {
        let executor = self.executor.clone();
        let addr = ctx.address();
        let id = descriptor.id;
        actix::spawn(async move {
            let progress = addr.clone();
            let outcome = executor
                .run(&descriptor, &stop, move |sample| {
                    progress.do_send(TransferProgress { id, run, sample });
                })
                .await;
            addr.do_send(TransferFinished { id, run, outcome });
        });
    }

    pub(super) fn apply_progress(&mut self, msg: TransferProgress) {
        if !self.pool.is_current(&msg.id, msg.run) {
            return;
        }
        let descriptor = match self.descriptors.get_mut(&msg.id) {
            Some(d) if d.status == TransferStatus::Active => d,
            // 暂停/取消之后的进度不再更新，字段停在最后的值
            _ => return,
        };
        let sample = msg.sample;
        descriptor.record_progress(sample.bytes_transferred, sample.total_size, sample.speed_bps);
        if sample.publish {
            self.publish(EventKind::Progress, &msg.id);
        }
    }

    /// 执行器退出：释放槽位，按当前状态落实结果，然后重新调度
    pub(super) fn apply_outcome(&mut self, ctx: &mut Context<Self>, msg: TransferFinished) {
        if !self.pool.release(&msg.id, msg.run) {
            log::debug!("忽略任务 {} 过期的结束消息", msg.id);
            return;
        }

        if let Some(status) = self.descriptors.get(&msg.id).map(|d| d.status) {
            self.settle(msg, status);
        }

        self.persist();
        if self.shutting_down {
            if self.pool.is_empty() {
                self.finish_shutdown(ctx);
            }
        } else {
            self.dispatch(ctx);
        }
    }

    fn settle(&mut self, msg: TransferFinished, status: TransferStatus) {
        let id = msg.id;
        let descriptor = match self.descriptors.get_mut(&id) {
            Some(d) => d,
            None => return,
        };

        match (status, msg.outcome) {
            // 完成优先于并发到达的暂停/恢复
            (
                TransferStatus::Active | TransferStatus::Paused | TransferStatus::Queued,
                TransferOutcome::Completed { bytes, total },
            ) => {
                descriptor.record_progress(bytes, total, descriptor.speed_bps);
                descriptor.status = TransferStatus::Completed;
                descriptor.ended_at = Some(Utc::now());
                descriptor.eta_seconds = None;
                descriptor.error = None;
                self.queue.remove(&id);
                log::info!("任务 {} 完成 ({} 字节)", id, bytes);
                self.publish(EventKind::Completed, &id);
            }
            (
                TransferStatus::Active,
                TransferOutcome::Failed {
                    reason,
                    bytes_on_disk,
                    total,
                },
            ) => {
                descriptor.record_progress(bytes_on_disk, total, descriptor.speed_bps);
                descriptor.status = TransferStatus::Failed;
                descriptor.ended_at = Some(Utc::now());
                log::error!("任务 {} 失败: {}", id, reason);
                descriptor.error = Some(reason);
                self.publish(EventKind::Failed, &id);
            }
            (TransferStatus::Active, TransferOutcome::Cancelled { bytes_on_disk, total }) => {
                // 没有收到控制请求却停止了，按暂停处理
                descriptor.record_progress(bytes_on_disk, total, descriptor.speed_bps);
                descriptor.status = TransferStatus::Paused;
                descriptor.resume_allowed = true;
                self.publish(EventKind::Paused, &id);
            }
            (
                TransferStatus::Paused,
                TransferOutcome::Failed { bytes_on_disk, total, .. }
                | TransferOutcome::Cancelled { bytes_on_disk, total },
            ) => {
                descriptor.record_progress(bytes_on_disk, total, descriptor.speed_bps);
                descriptor.resume_allowed = true;
            }
            (
                TransferStatus::Queued,
                TransferOutcome::Failed { bytes_on_disk, total, .. }
                | TransferOutcome::Cancelled { bytes_on_disk, total },
            ) => {
                // 执行器退出前就被恢复了，现在才能重新排队
                descriptor.record_progress(bytes_on_disk, total, 0);
                descriptor.resume_allowed = true;
                let priority = descriptor.priority;
                self.queue.push(id, priority);
            }
            (TransferStatus::Cancelled, TransferOutcome::Completed { .. }) => {
                log::info!("任务 {} 在取消前已完成，保留目标文件", id);
            }
            (TransferStatus::Cancelled, _) => {
                remove_partial(&descriptor.partial_path());
            }
            (status, outcome) => {
                log::warn!("任务 {} 处于 {:?} 时收到结果 {:?}", id, status, outcome);
            }
        }
    }
}
