//! 工作槽位：记录正在运行的执行器以及它们的协作式停止信号
//!
//! 槽位从准入开始占用，直到执行器上报结束才释放。暂停或取消只会发出停止信号，
//! 不会提前释放槽位，因此同一个 .partial 文件不会被两个执行器同时持有。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::core::task::state::TransferId;

/// 停止原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Pause,
    Cancel,
    Shutdown,
}

impl StopReason {
    fn code(self) -> u8 {
        match self {
            StopReason::Pause => 1,
            StopReason::Cancel => 2,
            StopReason::Shutdown => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(StopReason::Pause),
            2 => Some(StopReason::Cancel),
            3 => Some(StopReason::Shutdown),
            _ => None,
        }
    }
}

/// 协作式停止信号，执行器在检查点读取
#[derive(Debug, Default)]
pub struct StopSignal {
    reason: AtomicU8,
    notify: Notify,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只记录第一次的原因
    pub fn raise(&self, reason: StopReason) {
        let _ = self
            .reason
            .compare_exchange(0, reason.code(), Ordering::SeqCst, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn reason(&self) -> Option<StopReason> {
        StopReason::from_code(self.reason.load(Ordering::SeqCst))
    }

    pub fn is_raised(&self) -> bool {
        self.reason().is_some()
    }

    /// 等待停止信号；notify_one 会留下许可，先检查再等待不会丢信号
    pub async fn raised(&self) {
        while !self.is_raised() {
            self.notify.notified().await;
        }
    }
}

struct Slot {
    run: u64,
    stop: Arc<StopSignal>,
}

/// 执行槽位集合
#[derive(Default)]
pub struct WorkerPool {
    slots: HashMap<TransferId, Slot>,
    next_run: u64,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 上限每次由调用方传入（配置可在运行时修改）
    pub fn has_capacity(&self, limit: usize) -> bool {
        self.slots.len() < limit
    }

    pub fn is_running(&self, id: &TransferId) -> bool {
        self.slots.contains_key(id)
    }

    /// 占用槽位，返回本次运行的编号和停止信号；同一 id 已在运行时返回 None
    pub fn occupy(&mut self, id: TransferId) -> Option<(u64, Arc<StopSignal>)> {
        if self.slots.contains_key(&id) {
            return None;
        }
        self.next_run += 1;
        let stop = Arc::new(StopSignal::new());
        self.slots.insert(
            id,
            Slot {
                run: self.next_run,
                stop: stop.clone(),
            },
        );
        Some((self.next_run, stop))
    }

    pub fn is_current(&self, id: &TransferId, run: u64) -> bool {
        self.slots.get(id).map(|s| s.run == run).unwrap_or(false)
    }

    /// 执行器结束后释放槽位；过期的运行编号不会释放新的槽位
    pub fn release(&mut self, id: &TransferId, run: u64) -> bool {
        if self.is_current(id, run) {
            self.slots.remove(id);
            true
        } else {
            false
        }
    }

    pub fn signal(&self, id: &TransferId, reason: StopReason) -> bool {
        match self.slots.get(id) {
            Some(slot) => {
                slot.stop.raise(reason);
                true
            }
            None => false,
        }
    }

    pub fn signal_all(&self, reason: StopReason) {
        for slot in self.slots.values() {
            slot.stop.raise(reason);
        }
    }

    pub fn running_ids(&self) -> Vec<TransferId> {
        self.slots.keys().copied().collect()
    }
}
