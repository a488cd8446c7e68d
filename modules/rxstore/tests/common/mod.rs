//! Shared helpers for store integration tests.

#![allow(dead_code)]

use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::mpsc;
use futures::stream::{self, BoxStream};
use futures::{future, Stream, StreamExt};
use rxstore::{
    side_effect_fn, ActionStream, Session, SessionItem, SideEffect, StateAccessor, StoreLogger,
};
use tracing_subscriber::EnvFilter;

pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Upstreams
// ---------------------------------------------------------------------------

/// A finite upstream that completes after `items`.
pub fn actions<A: Send + 'static>(items: Vec<A>) -> impl Stream<Item = anyhow::Result<A>> + Send {
    stream::iter(items.into_iter().map(Ok))
}

/// An upstream the test pushes into. Completes when the sender is dropped.
pub fn open_upstream<A: Send + 'static>() -> (
    mpsc::UnboundedSender<A>,
    BoxStream<'static, anyhow::Result<A>>,
) {
    let (tx, rx) = mpsc::unbounded();
    (tx, rx.map(Ok).boxed())
}

// ---------------------------------------------------------------------------
// Session readers
// ---------------------------------------------------------------------------

/// Read exactly `n` states, failing on error, early end or timeout.
pub async fn take_states<S: Debug, A: Debug>(session: &mut Session<S, A>, n: usize) -> Vec<S> {
    let mut states = Vec::with_capacity(n);
    for _ in 0..n {
        let item = tokio::time::timeout(WAIT, session.next())
            .await
            .expect("timed out waiting for a state")
            .expect("session ended early");
        states.push(item.expect("unexpected session error"));
    }
    states
}

/// Read the session until it ends.
pub async fn drain<S, A>(session: Session<S, A>) -> Vec<SessionItem<S, A>> {
    tokio::time::timeout(WAIT, session.collect::<Vec<_>>())
        .await
        .expect("session did not end")
}

/// Assert nothing arrives for a short while.
pub async fn assert_quiet<S: Debug, A: Debug>(session: &mut Session<S, A>) {
    let next = tokio::time::timeout(Duration::from_millis(100), session.next()).await;
    assert!(next.is_err(), "expected no item, got {next:?}");
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

/// Appends `marker` to every action equal to `trigger`.
pub fn marker(trigger: &'static str, marker: &'static str) -> impl SideEffect<String, String> {
    side_effect_fn(
        move |actions: ActionStream<String>, _state: StateAccessor<String>| {
            actions
                .filter(move |a| future::ready(a.as_str() == trigger))
                .map(move |a| Ok(format!("{a}{marker}")))
                .boxed()
        },
    )
}

/// Like [`marker`], but bumps `counter` when its output stream is dropped.
pub fn marker_with_teardown(
    trigger: &'static str,
    output: &'static str,
    counter: TeardownCounter,
) -> impl SideEffect<String, String> {
    side_effect_fn(
        move |actions: ActionStream<String>, _state: StateAccessor<String>| {
            let guard = counter.guard();
            actions
                .filter(move |a| future::ready(a.as_str() == trigger))
                .map(move |_| {
                    let _held = &guard;
                    Ok(output.to_string())
                })
                .boxed()
        },
    )
}

#[derive(Clone, Default)]
pub struct TeardownCounter(Arc<AtomicUsize>);

impl TeardownCounter {
    pub fn guard(&self) -> TeardownGuard {
        TeardownGuard(Arc::clone(&self.0))
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct TeardownGuard(Arc<AtomicUsize>);

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Records every hook as a line of text.
#[derive(Clone, Default)]
pub struct RecordingLogger {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingLogger {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    fn push(&self, line: String) {
        self.lines.lock().unwrap().push(line);
    }
}

impl<S: Debug + 'static, A: Debug + 'static> StoreLogger<S, A> for RecordingLogger {
    fn on_state_initialized(&self, initial: &S) {
        self.push(format!("init {initial:?}"));
    }

    fn on_action_received(&self, action: &A, state: &S) {
        self.push(format!("action {action:?} on {state:?}"));
    }

    fn on_state_updated(&self, old: &S, new: &S, action: &A) {
        self.push(format!("update {old:?} -> {new:?} via {action:?}"));
    }

    fn on_side_effect_error(&self, current: &S, error: &anyhow::Error) {
        self.push(format!("side effect error on {current:?}: {error}"));
    }

    fn on_reduce_error(&self, action: &A, state: &S, error: &anyhow::Error) {
        self.push(format!("reduce error {action:?} on {state:?}: {error}"));
    }
}
