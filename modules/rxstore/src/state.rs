//! The session's current-state cell.
//!
//! Single writer (the reducer actor), any number of lock-free readers. Each
//! reduction swaps in a fresh `Arc<S>`, so a reader sees either the old or
//! the new value, never a partial one.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

pub(crate) struct StateCell<S> {
    inner: Arc<ArcSwap<S>>,
}

impl<S> StateCell<S> {
    pub(crate) fn new(initial: S) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    pub(crate) fn load(&self) -> Arc<S> {
        self.inner.load_full()
    }

    /// Replace the current state. Returns the previous one.
    pub(crate) fn publish(&self, next: S) -> Arc<S> {
        self.inner.swap(Arc::new(next))
    }

    pub(crate) fn accessor(&self) -> StateAccessor<S> {
        StateAccessor {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Reads the latest committed state of a session on demand.
///
/// Not a subscription: each call returns whatever the reducer last published.
/// Under concurrent producers that can be newer than the action a side effect
/// is currently handling.
pub struct StateAccessor<S> {
    inner: Arc<ArcSwap<S>>,
}

impl<S> StateAccessor<S> {
    /// An accessor over a fixed value, for exercising a side effect outside a store.
    pub fn detached(value: S) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(value)),
        }
    }

    /// Latest committed state, shared.
    pub fn load(&self) -> Arc<S> {
        self.inner.load_full()
    }
}

impl<S: Clone> StateAccessor<S> {
    /// Latest committed state, cloned.
    pub fn get(&self) -> S {
        S::clone(&self.inner.load())
    }
}

impl<S> Clone for StateAccessor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for StateAccessor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateAccessor")
            .field(&*self.inner.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessor_follows_published_state() {
        let cell = StateCell::new(1u32);
        let accessor = cell.accessor();
        assert_eq!(accessor.get(), 1);

        let previous = cell.publish(2);
        assert_eq!(*previous, 1);
        assert_eq!(accessor.get(), 2);
        assert_eq!(*cell.load(), 2);
    }

    #[test]
    fn cloned_accessors_share_the_cell() {
        let cell = StateCell::new("a".to_string());
        let first = cell.accessor();
        let second = first.clone();

        cell.publish("b".to_string());

        assert_eq!(first.get(), "b");
        assert_eq!(*second.load(), "b");
    }

    #[test]
    fn readers_on_other_threads_see_whole_values() {
        let cell = StateCell::new(vec![0u64; 64]);
        let accessor = cell.accessor();

        let reader = std::thread::spawn(move || {
            for _ in 0..10_000 {
                let snapshot = accessor.load();
                let first = snapshot[0];
                assert!(snapshot.iter().all(|v| *v == first));
            }
        });

        for round in 1..=1_000u64 {
            cell.publish(vec![round; 64]);
        }
        reader.join().unwrap();
    }

    #[test]
    fn detached_accessor_returns_its_value() {
        let accessor = StateAccessor::detached(5i32);
        assert_eq!(accessor.get(), 5);
        assert_eq!(format!("{accessor:?}"), "StateAccessor(5)");
    }
}
