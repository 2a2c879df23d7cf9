use std::collections::VecDeque;

use rustc_hash::FxHashSet;
use sieve_core::ObjectKey;

/// Coalescing FIFO of identities awaiting reconcile.
///
/// An identity is queued at most once. While it is in flight further pushes
/// only mark it dirty; `done` re-queues a dirty identity so it gets exactly
/// one more pass.
#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    order: VecDeque<ObjectKey>,
    queued: FxHashSet<ObjectKey>,
    in_flight: FxHashSet<ObjectKey>,
    dirty: FxHashSet<ObjectKey>,
}

impl WorkQueue {
    pub fn push(&mut self, key: ObjectKey) {
        if self.in_flight.contains(&key) {
            self.dirty.insert(key);
        } else if self.queued.insert(key.clone()) {
            self.order.push_back(key);
        }
    }

    /// Next identity to reconcile; it stays in flight until `done`.
    pub fn pop(&mut self) -> Option<ObjectKey> {
        let key = self.order.pop_front()?;
        self.queued.remove(&key);
        self.in_flight.insert(key.clone());
        Some(key)
    }

    /// Finish a pass. Returns true when the identity was dirty and is queued again.
    pub fn done(&mut self, key: &ObjectKey) -> bool {
        self.in_flight.remove(key);
        if self.dirty.remove(key) {
            self.push(key.clone());
            return true;
        }
        false
    }

    pub fn len(&self) -> usize { self.order.len() }

    pub fn in_flight(&self) -> usize { self.in_flight.len() }

    pub fn is_idle(&self) -> bool { self.order.is_empty() && self.in_flight.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(name: &str) -> ObjectKey { ObjectKey::namespaced("biz", name) }

    #[test]
    fn coalesces_and_keeps_fifo_order() {
        let mut q = WorkQueue::default();
        q.push(k("a"));
        q.push(k("b"));
        q.push(k("a"));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(), Some(k("a")));
        assert_eq!(q.pop(), Some(k("b")));
        assert_eq!(q.pop(), None);
        assert_eq!(q.in_flight(), 2);
    }

    #[test]
    fn in_flight_push_reruns_once_after_done() {
        let mut q = WorkQueue::default();
        q.push(k("a"));
        let a = q.pop().expect("queued");
        q.push(k("a"));
        q.push(k("a"));
        assert_eq!(q.len(), 0, "in-flight identity must not run concurrently");
        assert!(q.done(&a));
        assert_eq!(q.len(), 1);
        let again = q.pop().expect("rerun");
        assert!(!q.done(&again));
        assert!(q.is_idle());
    }
}
