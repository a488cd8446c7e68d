//! Optional diagnostic hook.
//!
//! A [`StoreLogger`] is handed to the store explicitly; there is no global
//! default. Hooks run inline on the reducer actor, after the fact they report,
//! and cannot influence routing or ordering.

use std::fmt::Debug;
use std::marker::PhantomData;

use tracing::{debug, error, trace};

/// Observer of one session's internal events. Every hook defaults to a no-op.
pub trait StoreLogger<S, A>: Send + Sync + 'static {
    fn on_state_initialized(&self, _initial: &S) {}

    /// An action was dequeued and is about to be reduced against `state`.
    fn on_action_received(&self, _action: &A, _state: &S) {}

    fn on_state_updated(&self, _old: &S, _new: &S, _action: &A) {}

    fn on_side_effect_error(&self, _current: &S, _error: &anyhow::Error) {}

    fn on_reduce_error(&self, _action: &A, _state: &S, _error: &anyhow::Error) {}
}

/// Forwards every hook to `tracing` under the `rxstore::session` target.
pub struct TracingLogger<S, A> {
    _phantom: PhantomData<fn(&S, &A)>,
}

impl<S, A> TracingLogger<S, A> {
    pub fn new() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<S, A> Default for TracingLogger<S, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, A> StoreLogger<S, A> for TracingLogger<S, A>
where
    S: Debug + 'static,
    A: Debug + 'static,
{
    fn on_state_initialized(&self, initial: &S) {
        debug!(target: "rxstore::session", state = ?initial, "State initialized");
    }

    fn on_action_received(&self, action: &A, state: &S) {
        trace!(target: "rxstore::session", ?action, ?state, "Action received");
    }

    fn on_state_updated(&self, old: &S, new: &S, action: &A) {
        debug!(
            target: "rxstore::session",
            ?action,
            old_state = ?old,
            new_state = ?new,
            "State updated"
        );
    }

    fn on_side_effect_error(&self, current: &S, error: &anyhow::Error) {
        error!(target: "rxstore::session", state = ?current, error = %error, "Side effect error");
    }

    fn on_reduce_error(&self, action: &A, state: &S, error: &anyhow::Error) {
        error!(target: "rxstore::session", ?action, ?state, error = %error, "Reduce error");
    }
}
