//! Core traits for the store engine.

use std::fmt::Debug;

use anyhow::Result;
use futures::stream::BoxStream;

use crate::router::ActionStream;
use crate::state::StateAccessor;

/// Values the store keeps as its current state.
///
/// Blanket-implemented; any cloneable, debuggable, thread-safe value qualifies.
pub trait State: Clone + Debug + Send + Sync + 'static {}

impl<T> State for T where T: Clone + Debug + Send + Sync + 'static {}

/// Discrete events fed through the reducer.
pub trait Action: Clone + Debug + Send + Sync + 'static {}

impl<T> Action for T where T: Clone + Debug + Send + Sync + 'static {}

/// Output of a side effect: further actions, or a failure that ends the session.
pub type ActionOutput<A> = BoxStream<'static, Result<A>>;

/// Pure state transition. No I/O, no blocking.
///
/// Called once per action, never concurrently with itself within a session.
/// Returning an error (or panicking) terminates the session with
/// [`StoreError::Reducer`](crate::StoreError::Reducer).
pub trait Reducer<S, A>: Send + Sync + 'static {
    fn reduce(&self, state: &S, action: &A) -> Result<S>;
}

impl<S, A, F> Reducer<S, A> for F
where
    F: Fn(&S, &A) -> Result<S> + Send + Sync + 'static,
{
    fn reduce(&self, state: &S, action: &A) -> Result<S> {
        self(state, action)
    }
}

/// Reacts to the action stream and emits further actions.
///
/// Receives every reduced action (including those emitted by other side
/// effects and by itself) and must filter for the ones it handles. The
/// accessor always returns the latest committed state, which may already be
/// ahead of the action currently being handled when other producers are busy.
///
/// Completion of the returned stream is ignored. An `Err` item terminates the
/// session with [`StoreError::SideEffect`](crate::StoreError::SideEffect).
pub trait SideEffect<S, A>: Send + Sync + 'static {
    fn run(&self, actions: ActionStream<A>, state: StateAccessor<S>) -> ActionOutput<A>;
}

impl<S, A, F> SideEffect<S, A> for F
where
    F: Fn(ActionStream<A>, StateAccessor<S>) -> ActionOutput<A> + Send + Sync + 'static,
{
    fn run(&self, actions: ActionStream<A>, state: StateAccessor<S>) -> ActionOutput<A> {
        self(actions, state)
    }
}

/// Pins a closure to the [`Reducer`] signature so argument and return types
/// are inferred.
pub fn reducer_fn<S, A, F>(f: F) -> F
where
    F: Fn(&S, &A) -> Result<S> + Send + Sync + 'static,
{
    f
}

/// Pins a closure to the [`SideEffect`] signature.
pub fn side_effect_fn<S, A, F>(f: F) -> F
where
    F: Fn(ActionStream<A>, StateAccessor<S>) -> ActionOutput<A> + Send + Sync + 'static,
{
    f
}
