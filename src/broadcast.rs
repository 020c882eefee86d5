//! Fan-out of supervisor events to observers.
//!
//! Observers subscribe and receive a `Subscription` holding the receiving half of an
//! unbounded channel. The broadcaster keeps only the sending halves, so dropping a
//! subscription tears the observer down; the next publish notices the closed channel
//! and forgets the observer. Nothing is buffered for future subscribers.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::events::Event;

/// A registry of live observers.
#[derive(Debug, Default)]
pub struct Broadcaster {
    observers: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
}

/// The receiving end handed to an observer.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl Broadcaster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new observer. It sees only events published from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        Subscription { rx }
    }

    /// Delivers `event` to every live observer, dropping the ones that went away.
    pub fn publish(&self, event: Event) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of observers that were alive at the last publish.
    pub fn observer_count(&self) -> usize {
        let mut observers = self.lock();
        observers.retain(|tx| !tx.is_closed());
        observers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<Event>>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Subscription {
    /// Waits for the next event. Returns `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Returns an already queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Status;

    #[test]
    fn publishes_to_every_observer() {
        let broadcaster = Broadcaster::new();
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        broadcaster.publish(Event::status("t1", Status::Starting));
        assert_eq!(a.try_recv(), Some(Event::status("t1", Status::Starting)));
        assert_eq!(b.try_recv(), Some(Event::status("t1", Status::Starting)));
    }

    #[test]
    fn torn_down_observers_are_skipped() {
        let broadcaster = Broadcaster::new();
        let dropped = broadcaster.subscribe();
        let mut kept = broadcaster.subscribe();
        drop(dropped);
        broadcaster.publish(Event::output("t1", "line\n"));
        assert_eq!(broadcaster.observer_count(), 1);
        assert_eq!(kept.try_recv(), Some(Event::output("t1", "line\n")));
    }

    #[test]
    fn late_subscribers_see_no_history() {
        let broadcaster = Broadcaster::new();
        broadcaster.publish(Event::status("t1", Status::Running));
        let mut late = broadcaster.subscribe();
        assert_eq!(late.try_recv(), None);
    }
}
