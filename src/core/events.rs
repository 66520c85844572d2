use actix::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::core::task::state::{TransferDescriptor, TransferId, TransferStatus};

/// 生命周期/进度事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Queued,
    Active,
    Progress,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// 发布给订阅者的事件：事件类型 + 描述符快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    pub id: TransferId,
    pub kind: EventKind,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub total_size: u64,
    pub speed_bps: u64,
    pub eta_seconds: Option<u64>,
    pub error_reason: Option<String>,
    pub snapshot: TransferDescriptor,
}

impl TransferEvent {
    pub fn new(kind: EventKind, descriptor: &TransferDescriptor) -> Self {
        Self {
            id: descriptor.id,
            kind,
            status: descriptor.status,
            bytes_transferred: descriptor.bytes_transferred,
            total_size: descriptor.total_size,
            speed_bps: descriptor.speed_bps,
            eta_seconds: descriptor.eta_seconds,
            error_reason: descriptor.error.as_ref().map(|e| e.code().to_string()),
            snapshot: descriptor.clone(),
        }
    }
}

impl Message for TransferEvent {
    type Result = ();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

enum Subscriber {
    Actor(Recipient<TransferEvent>),
    Channel(UnboundedSender<TransferEvent>),
}

impl Subscriber {
    /// 投递不会阻塞；返回订阅者是否仍然存活
    fn deliver(&self, event: TransferEvent) -> bool {
        match self {
            Subscriber::Actor(recipient) => {
                if !recipient.connected() {
                    return false;
                }
                let _ = recipient.do_send(event);
                true
            }
            Subscriber::Channel(sender) => sender.send(event).is_ok(),
        }
    }
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: HashMap<SubscriptionId, Subscriber>,
}

/// 事件总线：管理器只负责 publish，订阅者不可能阻塞调度
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Subscribers>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, subscriber: Subscriber) -> SubscriptionId {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        inner.entries.insert(id, subscriber);
        id
    }

    /// 以 actor 作为处理者订阅
    pub fn subscribe(&self, recipient: Recipient<TransferEvent>) -> SubscriptionId {
        self.insert(Subscriber::Actor(recipient))
    }

    /// 以无界通道订阅
    pub fn subscribe_channel(&self) -> (SubscriptionId, UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = unbounded_channel();
        (self.insert(Subscriber::Channel(tx)), rx)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.inner.lock() {
            Ok(mut inner) => inner.entries.remove(&id).is_some(),
            Err(poisoned) => poisoned.into_inner().entries.remove(&id).is_some(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        match self.inner.lock() {
            Ok(inner) => inner.entries.len(),
            Err(poisoned) => poisoned.into_inner().entries.len(),
        }
    }

    /// 依次投递给所有订阅者，顺带清理已断开的订阅
    pub fn publish(&self, event: TransferEvent) {
        let mut inner = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        inner
            .entries
            .retain(|_, subscriber| subscriber.deliver(event.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::state::{TransferRequest, DEFAULT_PRIORITY};
    use std::time::Duration;

    fn descriptor() -> TransferDescriptor {
        TransferDescriptor::new(
            TransferRequest::new("https://cdn.example.com/icon.png", "/tmp/icon.png"),
            DEFAULT_PRIORITY,
        )
    }

    struct Collector {
        seen: Arc<Mutex<Vec<EventKind>>>,
    }

    impl Actor for Collector {
        type Context = Context<Self>;
    }

    impl Handler<TransferEvent> for Collector {
        type Result = ();
        fn handle(&mut self, msg: TransferEvent, _ctx: &mut Self::Context) {
            self.seen.lock().unwrap().push(msg.kind);
        }
    }

    #[test]
    fn test_channel_subscription_in_order() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe_channel();
        let d = descriptor();
        bus.publish(TransferEvent::new(EventKind::Queued, &d));
        bus.publish(TransferEvent::new(EventKind::Active, &d));
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Queued);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Active);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_and_prune() {
        let bus = EventBus::new();
        let (first, _rx1) = bus.subscribe_channel();
        let (_second, rx2) = bus.subscribe_channel();
        assert_eq!(bus.subscriber_count(), 2);
        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));

        // 接收端丢弃后，下一次发布会清理掉
        drop(rx2);
        bus.publish(TransferEvent::new(EventKind::Queued, &descriptor()));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_payload_fields() {
        let mut d = descriptor();
        d.status = TransferStatus::Failed;
        d.error = Some(crate::core::error::DownloadError::HttpStatus(503).into_failure());
        let event = TransferEvent::new(EventKind::Failed, &d);
        assert_eq!(event.id, d.id);
        assert_eq!(event.error_reason.as_deref(), Some("network"));
        assert_eq!(event.snapshot, d);
    }

    #[actix_rt::test]
    async fn test_actor_subscriber() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let addr = Collector { seen: seen.clone() }.start();
        let bus = EventBus::new();
        bus.subscribe(addr.recipient());
        let d = descriptor();
        bus.publish(TransferEvent::new(EventKind::Queued, &d));
        bus.publish(TransferEvent::new(EventKind::Cancelled, &d));
        actix_rt::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*seen.lock().unwrap(), vec![EventKind::Queued, EventKind::Cancelled]);
    }
}
