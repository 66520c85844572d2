use actix::prelude::*;
use chrono::Utc;
use std::path::Path;
use tokio::sync::oneshot;

use super::actor::{remove_partial, DownloadManagerActor};
use super::messages::*;
use crate::core::error::{DownloadError, FailureKind};
use crate::core::events::EventKind;
use crate::core::pool::StopReason;
use crate::core::task::state::{TransferDescriptor, TransferId, TransferStatus};
use crate::utils::validator::validate_request;

impl DownloadManagerActor {
    fn status_of(&self, id: &TransferId) -> Result<TransferStatus, DownloadError> {
        self.descriptors
            .get(id)
            .map(|d| d.status)
            .ok_or(DownloadError::NotFound(*id))
    }

    fn ignored(&self, id: &TransferId, status: TransferStatus, action: &str) -> ControlOutcome {
        log::warn!("任务 {} 处于 {:?}，忽略 {}", id, status, action);
        ControlOutcome::Ignored(status)
    }

    /// 目标路径被其它任务占用：未结束，或执行器还没退出（.partial 仍归它所有）
    pub(super) fn destination_busy(&self, destination: &Path, except: Option<&TransferId>) -> bool {
        self.descriptors.values().any(|d| {
            Some(&d.id) != except
                && d.request.destination == destination
                && (!d.status.is_terminal() || self.pool.is_running(&d.id))
        })
    }

    fn busy_error(destination: &Path) -> DownloadError {
        DownloadError::Validation(format!("目标文件已有未完成的下载: {:?}", destination))
    }
}

impl Handler<SubmitTransfer> for DownloadManagerActor {
    type Result = Result<TransferId, DownloadError>;
    fn handle(&mut self, msg: SubmitTransfer, ctx: &mut Self::Context) -> Self::Result {
        if self.shutting_down {
            return Err(DownloadError::Validation("下载管理器正在关闭".to_string()));
        }
        validate_request(&msg.request)?;
        if self.destination_busy(&msg.request.destination, None) {
            return Err(Self::busy_error(&msg.request.destination));
        }

        let descriptor = TransferDescriptor::new(msg.request, msg.priority);
        let id = descriptor.id;
        log::info!("提交任务 {}: {} -> {:?}", id, descriptor.url(), descriptor.destination());
        self.descriptors.insert(id, descriptor);
        self.queue.push(id, msg.priority);
        self.publish(EventKind::Queued, &id);
        self.persist();
        self.dispatch(ctx);
        Ok(id)
    }
}

impl Handler<PauseTransfer> for DownloadManagerActor {
    type Result = Result<ControlOutcome, DownloadError>;
    fn handle(&mut self, msg: PauseTransfer, _ctx: &mut Self::Context) -> Self::Result {
        let id = msg.0;
        let status = self.status_of(&id)?;
        if status != TransferStatus::Active {
            return Ok(self.ignored(&id, status, "pause"));
        }

        if let Some(descriptor) = self.descriptors.get_mut(&id) {
            descriptor.status = TransferStatus::Paused;
            descriptor.resume_allowed = true;
            descriptor.eta_seconds = None;
        }
        // 槽位在执行器退出后才释放
        self.pool.signal(&id, StopReason::Pause);
        log::info!("暂停任务 {}", id);
        self.publish(EventKind::Paused, &id);
        self.persist();
        Ok(ControlOutcome::Applied)
    }
}

impl Handler<ResumeTransfer> for DownloadManagerActor {
    type Result = Result<ControlOutcome, DownloadError>;
    fn handle(&mut self, msg: ResumeTransfer, ctx: &mut Self::Context) -> Self::Result {
        let id = msg.0;
        let status = self.status_of(&id)?;
        let busy = self
            .descriptors
            .get(&id)
            .map(|d| self.destination_busy(d.destination(), Some(&id)))
            .unwrap_or(false);
        if busy {
            return Ok(self.ignored(&id, status, "resume"));
        }
        let priority = match self.descriptors.get_mut(&id) {
            Some(descriptor) if descriptor.can_resume() => {
                // 校验失败的数据不能再拼接，从头下载
                let corrupt = descriptor
                    .error
                    .as_ref()
                    .map(|e| e.kind == FailureKind::Integrity)
                    .unwrap_or(false);
                descriptor.status = TransferStatus::Queued;
                descriptor.resume_allowed = !corrupt;
                descriptor.error = None;
                descriptor.ended_at = None;
                descriptor.priority
            }
            _ => return Ok(self.ignored(&id, status, "resume")),
        };

        // 上一次执行还在收尾时，由结束处理负责重新入队
        if !self.pool.is_running(&id) {
            self.queue.push(id, priority);
        }
        log::info!("恢复任务 {}", id);
        self.publish(EventKind::Queued, &id);
        self.persist();
        self.dispatch(ctx);
        Ok(ControlOutcome::Applied)
    }
}

impl Handler<CancelTransfer> for DownloadManagerActor {
    type Result = Result<ControlOutcome, DownloadError>;
    fn handle(&mut self, msg: CancelTransfer, _ctx: &mut Self::Context) -> Self::Result {
        let id = msg.0;
        let status = self.status_of(&id)?;
        let partial = match self.descriptors.get_mut(&id) {
            Some(descriptor) if descriptor.can_cancel() => {
                descriptor.status = TransferStatus::Cancelled;
                descriptor.ended_at = Some(Utc::now());
                descriptor.eta_seconds = None;
                descriptor.partial_path()
            }
            _ => return Ok(self.ignored(&id, status, "cancel")),
        };

        self.queue.remove(&id);
        if self.pool.is_running(&id) {
            // 执行器退出后删除 .partial
            self.pool.signal(&id, StopReason::Cancel);
        } else {
            remove_partial(&partial);
        }
        log::info!("取消任务 {}", id);
        self.publish(EventKind::Cancelled, &id);
        self.persist();
        Ok(ControlOutcome::Applied)
    }
}

impl Handler<RetryTransfer> for DownloadManagerActor {
    type Result = Result<TransferId, DownloadError>;
    fn handle(&mut self, msg: RetryTransfer, ctx: &mut Self::Context) -> Self::Result {
        let id = msg.0;
        let status = self.status_of(&id)?;
        let failed = match self.descriptors.get(&id) {
            Some(descriptor) if descriptor.can_retry() => descriptor,
            _ => {
                return Err(DownloadError::InvalidTransition {
                    id,
                    status,
                    action: "retry",
                })
            }
        };

        if self.destination_busy(failed.destination(), Some(&id)) {
            return Err(Self::busy_error(failed.destination()));
        }

        let mut next = failed.successor();
        if failed.error.as_ref().map(|e| e.kind) == Some(FailureKind::Integrity) {
            next.resume_allowed = false;
        }
        let next_id = next.id;
        let priority = next.priority;
        if let Some(old) = self.descriptors.get_mut(&id) {
            old.retried_by = Some(next_id);
        }
        log::info!("重试任务 {} -> {}", id, next_id);
        self.descriptors.insert(next_id, next);
        self.queue.push(next_id, priority);
        self.publish(EventKind::Queued, &next_id);
        self.persist();
        self.dispatch(ctx);
        Ok(next_id)
    }
}

impl Handler<QueryTransfer> for DownloadManagerActor {
    type Result = Option<TransferDescriptor>;
    fn handle(&mut self, msg: QueryTransfer, _ctx: &mut Self::Context) -> Self::Result {
        self.descriptors.get(&msg.0).cloned()
    }
}

impl Handler<ListActive> for DownloadManagerActor {
    type Result = MessageResult<ListActive>;
    fn handle(&mut self, _msg: ListActive, _ctx: &mut Self::Context) -> Self::Result {
        let mut active: Vec<_> = self
            .descriptors
            .values()
            .filter(|d| d.status == TransferStatus::Active)
            .cloned()
            .collect();
        active.sort_by_key(|d| d.started_at);
        MessageResult(active)
    }
}

impl Handler<ListAll> for DownloadManagerActor {
    type Result = MessageResult<ListAll>;
    fn handle(&mut self, _msg: ListAll, _ctx: &mut Self::Context) -> Self::Result {
        let mut all: Vec<_> = self.descriptors.values().cloned().collect();
        all.sort_by_key(|d| d.created_at);
        MessageResult(all)
    }
}

impl Handler<FindByItem> for DownloadManagerActor {
    type Result = Option<TransferDescriptor>;
    fn handle(&mut self, msg: FindByItem, _ctx: &mut Self::Context) -> Self::Result {
        self.descriptors
            .values()
            .filter(|d| d.request.item_ref.as_deref() == Some(msg.0.as_str()))
            .max_by_key(|d| d.created_at)
            .cloned()
    }
}

impl Handler<EvictTransfer> for DownloadManagerActor {
    type Result = Result<bool, DownloadError>;
    fn handle(&mut self, msg: EvictTransfer, _ctx: &mut Self::Context) -> Self::Result {
        let id = msg.0;
        let status = self.status_of(&id)?;
        if !status.is_terminal() {
            return Err(DownloadError::InvalidTransition {
                id,
                status,
                action: "evict",
            });
        }
        if self.pool.is_running(&id) {
            return Ok(false);
        }
        self.descriptors.remove(&id);
        self.last_event.remove(&id);
        self.persist();
        Ok(true)
    }
}

impl Handler<Dispatch> for DownloadManagerActor {
    type Result = usize;
    fn handle(&mut self, _msg: Dispatch, ctx: &mut Self::Context) -> Self::Result {
        self.dispatch(ctx)
    }
}

impl Handler<Shutdown> for DownloadManagerActor {
    type Result = ResponseFuture<()>;
    fn handle(&mut self, _msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        let (tx, rx) = oneshot::channel();
        self.shutdown_waiters.push(tx);

        if !self.shutting_down {
            self.shutting_down = true;
            log::info!("正在停止 {} 个执行中的任务", self.pool.len());
            for id in self.pool.running_ids() {
                let paused = match self.descriptors.get_mut(&id) {
                    Some(d) if d.status == TransferStatus::Active => {
                        d.status = TransferStatus::Paused;
                        d.resume_allowed = true;
                        true
                    }
                    _ => false,
                };
                if paused {
                    self.publish(EventKind::Paused, &id);
                }
            }
            self.pool.signal_all(StopReason::Shutdown);
        }
        if self.pool.is_empty() {
            self.finish_shutdown(ctx);
        }

        Box::pin(async move {
            let _ = rx.await;
        })
    }
}

impl Handler<TransferProgress> for DownloadManagerActor {
    type Result = ();
    fn handle(&mut self, msg: TransferProgress, _ctx: &mut Self::Context) {
        self.apply_progress(msg);
    }
}

impl Handler<TransferFinished> for DownloadManagerActor {
    type Result = ();
    fn handle(&mut self, msg: TransferFinished, ctx: &mut Self::Context) {
        self.apply_outcome(ctx, msg);
    }
}
