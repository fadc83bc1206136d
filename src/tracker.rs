use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::error::SchedulerError;
use crate::types::{ExecutableItem, ItemEvent, ItemId, ItemState, Target, TargetId};

#[derive(Debug, Default)]
struct TrackerInner {
    items: HashMap<ItemId, ExecutableItem>,
    /// Identifiers of items that reached a terminal state, in arrival order.
    terminal: VecDeque<ItemId>,
    next_item_id: ItemId,
}

/// Bookkeeping of in-flight executable items.
///
/// Mutated by both the production loop and the reconciliation listener, so
/// every access goes through the single internal lock. An item's slot is only
/// freed by `drain_terminal` or `discard`, after its outcome (if any) has been
/// recorded.
#[derive(Debug)]
pub struct ExecutionTracker {
    inner: Mutex<TrackerInner>,
    capacity: usize,
}

impl ExecutionTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(TrackerInner::default()),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create an executable item for a committed target.
    ///
    /// Rejected when `capacity` items are already in flight; tracked items
    /// are left untouched by the rejection.
    pub fn track(&self, target: Target) -> Result<ExecutableItem, SchedulerError> {
        let mut inner = self.lock();

        let in_flight = inner
            .items
            .values()
            .filter(|i| i.state.is_in_flight())
            .count();
        if in_flight >= self.capacity {
            return Err(SchedulerError::TrackerFull {
                capacity: self.capacity,
            });
        }

        inner.next_item_id += 1;
        let item = ExecutableItem {
            item_id: inner.next_item_id,
            queue_index: None,
            target,
            state: ItemState::PendingSubmit,
            completion: None,
        };
        inner.items.insert(item.item_id, item.clone());
        Ok(item)
    }

    /// Record the queue index assigned on accepted submission.
    pub fn mark_queued(&self, item_id: ItemId, queue_index: u64) {
        let mut inner = self.lock();
        if let Some(item) = inner.items.get_mut(&item_id) {
            item.queue_index = Some(queue_index);
            item.state = ItemState::Queued;
        }
    }

    /// Apply a queue notification. Returns the affected target's identifier,
    /// or `None` for unknown items, which are logged and dropped rather than
    /// treated as errors.
    pub fn apply_event(&self, event: &ItemEvent) -> Option<TargetId> {
        let mut inner = self.lock();
        let Some(item) = inner.items.get_mut(&event.item_id) else {
            warn!(
                "Queue reported item {} which is not tracked; dropping.",
                event.item_id
            );
            return None;
        };

        item.state = event.state;
        if let Some(completion) = &event.completion {
            item.completion = Some(completion.clone());
        }

        let target_id = item.target.target_id;
        if event.state.is_terminal() {
            debug!(
                "Item {} (target {target_id}) reached terminal state {:?}.",
                event.item_id, event.state
            );
            inner.terminal.push_back(event.item_id);
        }
        Some(target_id)
    }

    /// Remove and return terminal items in outcome-arrival order.
    pub fn drain_terminal(&self) -> Vec<ExecutableItem> {
        let mut inner = self.lock();
        let mut drained = Vec::new();
        while let Some(item_id) = inner.terminal.pop_front() {
            if let Some(item) = inner.items.remove(&item_id) {
                drained.push(item);
            }
        }
        drained
    }

    /// Drop an item without reconciliation (cycle rollback path).
    pub fn discard(&self, item_id: ItemId) -> Option<ExecutableItem> {
        let mut inner = self.lock();
        inner.terminal.retain(|id| *id != item_id);
        inner.items.remove(&item_id)
    }

    /// Number of items still scheduled or running.
    pub fn in_flight(&self) -> usize {
        self.lock()
            .items
            .values()
            .filter(|i| i.state.is_in_flight())
            .count()
    }

    /// Items currently in flight, queue order not guaranteed.
    pub fn in_flight_items(&self) -> Vec<ExecutableItem> {
        self.lock()
            .items
            .values()
            .filter(|i| i.state.is_in_flight())
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;

    #[test]
    fn capacity_bound_rejects_without_corruption() {
        let tracker = ExecutionTracker::new(2);
        let a = tracker.track(MockDriver::make_target(1, 30.0)).unwrap();
        let b = tracker.track(MockDriver::make_target(2, 30.0)).unwrap();

        let err = tracker.track(MockDriver::make_target(3, 30.0)).unwrap_err();
        assert!(matches!(err, SchedulerError::TrackerFull { capacity: 2 }));

        // Existing items are intact and still in flight.
        assert_eq!(tracker.in_flight(), 2);
        assert!(tracker.discard(a.item_id).is_some());
        assert!(tracker.discard(b.item_id).is_some());
    }

    #[test]
    fn terminal_outcomes_drain_in_arrival_order() {
        let tracker = ExecutionTracker::new(10);
        let a = tracker.track(MockDriver::make_target(1, 30.0)).unwrap();
        let b = tracker.track(MockDriver::make_target(2, 30.0)).unwrap();

        // b finishes before a.
        tracker.apply_event(&ItemEvent {
            item_id: b.item_id,
            state: ItemState::Done,
            completion: None,
        });
        tracker.apply_event(&ItemEvent {
            item_id: a.item_id,
            state: ItemState::Failed,
            completion: None,
        });

        let drained = tracker.drain_terminal();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].item_id, b.item_id);
        assert_eq!(drained[1].item_id, a.item_id);
        assert!(tracker.is_empty());
    }

    #[test]
    fn unknown_item_event_is_dropped() {
        let tracker = ExecutionTracker::new(10);
        let applied = tracker.apply_event(&ItemEvent {
            item_id: 42,
            state: ItemState::Done,
            completion: None,
        });
        assert!(applied.is_none());
        assert!(tracker.drain_terminal().is_empty());
    }

    #[test]
    fn terminal_items_are_not_in_flight() {
        let tracker = ExecutionTracker::new(1);
        let a = tracker.track(MockDriver::make_target(1, 30.0)).unwrap();
        tracker.apply_event(&ItemEvent {
            item_id: a.item_id,
            state: ItemState::Done,
            completion: None,
        });

        // Terminal item no longer consumes capacity.
        assert_eq!(tracker.in_flight(), 0);
        tracker.track(MockDriver::make_target(2, 30.0)).unwrap();
    }
}
