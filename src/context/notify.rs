//! Did-save notification bus.
//!
//! Every save emits a notification carrying the changed record keys. All
//! contexts attached to the same stack observe the bus and merge the changes
//! into their own graphs on their own queues; this is the only path by which
//! one context's writes become visible to another.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::entity::RecordKey;

/// Payload of a "context did save" event.
#[derive(Debug, Clone)]
pub struct SaveNotification {
    /// Identity of the context that saved.
    pub source: u64,
    /// Keys of the records the save touched (inserted, updated, or deleted).
    pub changed: Vec<RecordKey>,
}

type Observer = Box<dyn Fn(&SaveNotification) + Send + Sync>;

/// Registry of save observers for one storage stack.
#[derive(Default)]
pub struct SaveBus {
    observers: RwLock<Vec<Observer>>,
}

impl SaveBus {
    pub fn new() -> Arc<Self> {
        Arc::new(SaveBus::default())
    }

    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(&SaveNotification) + Send + Sync + 'static,
    {
        self.observers.write().push(Box::new(observer));
    }

    pub fn notify(&self, notification: &SaveNotification) {
        for observer in self.observers.read().iter() {
            observer(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::RecordId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_observers_receive_notifications() {
        let bus = SaveBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.observe(move |notification| {
            counter.fetch_add(notification.changed.len(), Ordering::SeqCst);
        });

        bus.notify(&SaveNotification {
            source: 1,
            changed: vec![
                RecordKey::new("User", RecordId::Permanent(1)),
                RecordKey::new("User", RecordId::Permanent(2)),
            ],
        });
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }
}
