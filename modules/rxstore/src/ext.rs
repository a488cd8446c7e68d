//! Extension trait for attaching any action stream directly to a store.

use futures::Stream;

use crate::engine::Store;
use crate::session::Session;
use crate::traits::{Action, SideEffect, State};

/// Turns any action stream directly into a store session.
pub trait ActionStreamExt<A: Action>: Stream<Item = anyhow::Result<A>> + Sized + Send + 'static {
    /// Shorthand for building a one-off [`Store`] and attaching `self` to it.
    fn redux_store<S, F>(
        self,
        initial: S,
        side_effects: Vec<Box<dyn SideEffect<S, A>>>,
        reducer: F,
    ) -> Session<S, A>
    where
        S: State,
        F: Fn(&S, &A) -> anyhow::Result<S> + Send + Sync + 'static,
    {
        Store::builder(initial, reducer)
            .side_effects(side_effects)
            .build()
            .attach(self)
    }
}

impl<A, T> ActionStreamExt<A> for T
where
    A: Action,
    T: Stream<Item = anyhow::Result<A>> + Send + 'static,
{
}
