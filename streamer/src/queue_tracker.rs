//! Outstanding-item accounting per destination.
//!
//! Every item id is registered before its batch is sent, so an ack can never
//! race its own registration on a fast local transport. Acks for ids the
//! tracker does not know are logged and ignored; a peer may legitimately ack
//! after the producer has reconciled a failed send.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{debug, warn};

use shared::display::ViewerKind;
use shared::messages::AckStatus;

/// Per-destination tracker of sent-but-not-acked items.
#[derive(Default)]
pub struct QueueTracker {
    outstanding: Mutex<HashSet<String>>,
    drained: Condvar,
}

impl QueueTracker {
    /// Record an item as sent. Must be called before the frame leaves the
    /// process.
    pub fn register_sent(&self, item_id: &str) {
        let mut set = self.outstanding.lock().unwrap();
        if !set.insert(item_id.to_string()) {
            warn!("item `{item_id}` registered twice with the queue tracker");
        }
    }

    /// Record an ack for an item. Late or unknown ids are not fatal.
    pub fn mark_ack(&self, item_id: &str, status: AckStatus, reason: Option<&str>) {
        let mut set = self.outstanding.lock().unwrap();
        if !set.remove(item_id) {
            warn!("late ack for unknown item `{item_id}`");
            return;
        }
        if status == AckStatus::Error {
            warn!(
                "receiver reported failure for item `{item_id}`: {}",
                reason.unwrap_or("no reason given")
            );
        }
        if set.is_empty() {
            self.drained.notify_all();
        }
    }

    /// Forget registrations after a failed send so the destination drains.
    pub fn discard(&self, item_ids: &[String]) {
        let mut set = self.outstanding.lock().unwrap();
        for id in item_ids {
            set.remove(id);
        }
        if set.is_empty() {
            self.drained.notify_all();
        }
        debug!("discarded {} registrations", item_ids.len());
    }

    /// Number of items sent and not yet acked.
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().unwrap().len()
    }

    /// Wait until every registered item is acked or the timeout expires.
    /// Returns true when the destination drained.
    pub fn join(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut set = self.outstanding.lock().unwrap();
        while !set.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.drained.wait_timeout(set, deadline - now).unwrap();
            set = guard;
        }
        true
    }
}

/// Trackers keyed by `(destination, viewer kind)`.
#[derive(Default)]
pub struct QueueTrackerRegistry {
    trackers: Mutex<HashMap<(String, ViewerKind), Arc<QueueTracker>>>,
}

impl QueueTrackerRegistry {
    pub fn get_or_create(&self, destination: &str, viewer: ViewerKind) -> Arc<QueueTracker> {
        let mut map = self.trackers.lock().unwrap();
        Arc::clone(
            map.entry((destination.to_string(), viewer))
                .or_insert_with(|| Arc::new(QueueTracker::default())),
        )
    }
}

/// Process-level context threaded into backends instead of global state.
/// Initialized at startup, dropped at shutdown.
#[derive(Default)]
pub struct StreamContext {
    pub trackers: QueueTrackerRegistry,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn register_then_ack_drains() {
        let tracker = QueueTracker::default();
        tracker.register_sent("a");
        tracker.register_sent("b");
        assert_eq!(tracker.outstanding(), 2);

        tracker.mark_ack("a", AckStatus::Ok, None);
        tracker.mark_ack("b", AckStatus::Error, Some("boom"));
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn late_ack_is_ignored() {
        let tracker = QueueTracker::default();
        tracker.mark_ack("ghost", AckStatus::Ok, None);
        assert_eq!(tracker.outstanding(), 0);
    }

    #[test]
    fn discard_reconciles_failed_sends() {
        let tracker = QueueTracker::default();
        tracker.register_sent("a");
        tracker.register_sent("b");
        tracker.discard(&["a".to_string(), "b".to_string()]);
        assert_eq!(tracker.outstanding(), 0);
        assert!(tracker.join(Duration::from_millis(10)));
    }

    #[test]
    fn join_times_out_while_items_are_outstanding() {
        let tracker = QueueTracker::default();
        tracker.register_sent("a");
        assert!(!tracker.join(Duration::from_millis(50)));
    }

    #[test]
    fn join_wakes_on_final_ack() {
        let tracker = Arc::new(QueueTracker::default());
        tracker.register_sent("a");

        let acker = Arc::clone(&tracker);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            acker.mark_ack("a", AckStatus::Ok, None);
        });

        assert!(tracker.join(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn registry_reuses_tracker_per_key() {
        let registry = QueueTrackerRegistry::default();
        let first = registry.get_or_create("localhost:5556", ViewerKind::Fiji);
        let again = registry.get_or_create("localhost:5556", ViewerKind::Fiji);
        let other = registry.get_or_create("localhost:5556", ViewerKind::Napari);
        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
