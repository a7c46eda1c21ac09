//! Fan-out of batch events to connected observers.

use parking_lot::Mutex;
use scan::events::{BatchEvent, EventSink};
use tokio::sync::mpsc;
use tracing::debug;

/// Event sink that forwards every event to each subscribed observer.
///
/// Each observer gets its own unbounded channel, so a slow observer never
/// blocks the batch thread. Observers whose receiver is gone are pruned on the
/// next event. Subscribers only see events emitted after they subscribed.
#[derive(Default)]
pub struct ObserverHub {
    observers: Mutex<Vec<mpsc::UnboundedSender<BatchEvent>>>,
}

impl ObserverHub {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BatchEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observers.lock().push(tx);
        rx
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

impl EventSink for ObserverHub {
    fn emit(&self, event: &BatchEvent) {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|tx| tx.send(event.clone()).is_ok());
        let pruned = before - observers.len();
        if pruned > 0 {
            debug!(pruned, remaining = observers.len(), "pruned disconnected observers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn started() -> BatchEvent {
        BatchEvent::BatchStarted {
            batch_id: Uuid::nil(),
            total: 2,
        }
    }

    #[test]
    fn every_observer_receives_events_in_order() {
        let hub = ObserverHub::default();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.emit(&started());
        hub.emit(&BatchEvent::BatchCompleted {
            batch_id: Uuid::nil(),
            results: Vec::new(),
        });

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.try_recv().map(|e| e.kind()), Ok("batch_started"));
            assert_eq!(rx.try_recv().map(|e| e.kind()), Ok("batch_completed"));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn dropped_observers_are_pruned() {
        let hub = ObserverHub::default();
        let kept = hub.subscribe();
        drop(hub.subscribe());
        assert_eq!(hub.observer_count(), 2);

        hub.emit(&started());
        assert_eq!(hub.observer_count(), 1);
        drop(kept);
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let hub = ObserverHub::default();
        hub.emit(&started());
        let mut late = hub.subscribe();
        assert!(late.try_recv().is_err());
    }
}
