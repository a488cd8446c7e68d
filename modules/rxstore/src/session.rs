//! One live activation of a store: the observer-facing state stream plus the
//! bookkeeping that tears every task down together.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{Panicked, StoreError};

/// Item type of a [`Session`].
pub type SessionItem<S, A> = Result<S, StoreError<S, A>>;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Stopping,
    Closed,
}

/// Shared between the session stream, cancel handles, the reducer actor and
/// the supervisor.
pub(crate) struct Lifecycle {
    id: Uuid,
    detached: AtomicBool,
    phase: watch::Sender<Phase>,
}

impl Lifecycle {
    pub(crate) fn new() -> Arc<Self> {
        let (phase, _) = watch::channel(Phase::Running);
        Arc::new(Self {
            id: Uuid::new_v4(),
            detached: AtomicBool::new(false),
            phase,
        })
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    /// The observer walked away. Nothing further is delivered from here on.
    pub(crate) fn detach(&self) {
        if !self.detached.swap(true, Ordering::SeqCst) {
            debug!(session_id = %self.id, "Session cancelled by observer");
        }
        self.stop();
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    /// Ask the supervisor to tear the session down. Idempotent.
    pub(crate) fn stop(&self) {
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Running {
                *phase = Phase::Stopping;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn is_stopping(&self) -> bool {
        *self.phase.borrow() != Phase::Running
    }

    fn is_closed(&self) -> bool {
        *self.phase.borrow() == Phase::Closed
    }

    fn mark_closed(&self) {
        self.phase.send_replace(Phase::Closed);
    }

    async fn closed(&self) {
        let mut phase = self.phase.subscribe();
        // The sender lives as long as `self`, so this only resolves on Closed.
        wait_until(&mut phase, |p| p == Phase::Closed).await;
    }
}

async fn wait_until(phase: &mut watch::Receiver<Phase>, reached: impl Fn(Phase) -> bool) {
    let _ = phase.wait_for(|p| reached(*p)).await;
}

/// Owns every task of one session. Waits for a stop request (cancel or a
/// terminal event) or for all tasks to finish, then aborts and awaits the rest.
///
/// Holds a clone of the observer channel so a task that panics outside user
/// code still ends the session with an error rather than a clean end.
pub(crate) async fn supervise<S, A>(
    mut tasks: JoinSet<()>,
    lifecycle: Arc<Lifecycle>,
    downstream: mpsc::UnboundedSender<SessionItem<S, A>>,
) {
    let mut phase = lifecycle.phase.subscribe();

    loop {
        tokio::select! {
            biased;
            _ = wait_until(&mut phase, |p| p != Phase::Running) => break,
            joined = tasks.join_next() => match joined {
                Some(Ok(())) => {}
                Some(Err(e)) if e.is_panic() => {
                    let panicked = Panicked::from_payload(e.into_panic());
                    error!(
                        session_id = %lifecycle.id(),
                        error = %panicked,
                        "Session task panicked outside user code"
                    );
                    if !lifecycle.is_stopping() {
                        let _ = downstream.send(Err(StoreError::Internal {
                            source: Box::new(panicked),
                        }));
                    }
                    lifecycle.stop();
                    break;
                }
                Some(Err(_)) => {}
                None => break,
            },
        }
    }
    drop(downstream);

    let remaining = tasks.len();
    tasks.shutdown().await;
    lifecycle.mark_closed();
    debug!(session_id = %lifecycle.id(), aborted = remaining, "Session torn down");
}

// ---------------------------------------------------------------------------
// CancelHandle
// ---------------------------------------------------------------------------

/// Cancels a session from anywhere. Cheap to clone.
#[derive(Clone)]
pub struct CancelHandle {
    lifecycle: Arc<Lifecycle>,
}

impl CancelHandle {
    /// Stop the session. Synchronous and idempotent: once this returns the
    /// session stream yields nothing more and no further action is reduced.
    /// Task teardown finishes in the background; await [`closed`](Self::closed)
    /// to know it is done.
    pub fn cancel(&self) {
        self.lifecycle.detach();
    }

    /// Resolves once every upstream, side-effect and reducer task of the
    /// session has been dropped, whether through cancel, failure or completion.
    pub async fn closed(&self) {
        self.lifecycle.closed().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.lifecycle.is_detached()
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }

    pub fn session_id(&self) -> Uuid {
        self.lifecycle.id()
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The state stream of one attached observer.
///
/// Yields the initial state first, then one state per reduction. Ends without
/// an error when the upstream completes (see
/// [`CompletionPolicy`](crate::CompletionPolicy)), or yields exactly one
/// [`StoreError`] and then ends. Dropping the session cancels it.
pub struct Session<S, A> {
    states: mpsc::UnboundedReceiver<SessionItem<S, A>>,
    lifecycle: Arc<Lifecycle>,
}

impl<S, A> Session<S, A> {
    pub(crate) fn new(
        states: mpsc::UnboundedReceiver<SessionItem<S, A>>,
        lifecycle: Arc<Lifecycle>,
    ) -> Self {
        Self { states, lifecycle }
    }

    pub fn id(&self) -> Uuid {
        self.lifecycle.id()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            lifecycle: Arc::clone(&self.lifecycle),
        }
    }

    /// Cancel and wait until every task of the session has been dropped.
    pub async fn cancel(self) {
        let handle = self.cancel_handle();
        drop(self);
        handle.closed().await;
    }
}

impl<S, A> Unpin for Session<S, A> {}

impl<S, A> Stream for Session<S, A> {
    type Item = SessionItem<S, A>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.lifecycle.is_detached() {
            return Poll::Ready(None);
        }
        this.states.poll_recv(cx)
    }
}

impl<S, A> Drop for Session<S, A> {
    fn drop(&mut self) {
        self.lifecycle.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn stop_is_idempotent_and_observable() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.is_stopping());

        lifecycle.stop();
        lifecycle.stop();

        assert!(lifecycle.is_stopping());
        assert!(!lifecycle.is_detached());
    }

    #[tokio::test]
    async fn supervisor_aborts_tasks_on_stop() {
        let lifecycle = Lifecycle::new();
        let mut tasks = JoinSet::new();
        tasks.spawn(futures::future::pending::<()>());
        tasks.spawn(futures::future::pending::<()>());
        let (tx, _rx) = mpsc::unbounded_channel::<SessionItem<u8, u8>>();
        tokio::spawn(supervise(tasks, Arc::clone(&lifecycle), tx));

        lifecycle.stop();
        tokio::time::timeout(Duration::from_secs(1), lifecycle.closed())
            .await
            .expect("supervisor should close the session");
        assert!(lifecycle.is_closed());
    }

    #[tokio::test]
    async fn supervisor_closes_once_all_tasks_finish() {
        let lifecycle = Lifecycle::new();
        let mut tasks = JoinSet::new();
        tasks.spawn(async {});
        let (tx, _rx) = mpsc::unbounded_channel::<SessionItem<u8, u8>>();
        tokio::spawn(supervise(tasks, Arc::clone(&lifecycle), tx));

        tokio::time::timeout(Duration::from_secs(1), lifecycle.closed())
            .await
            .expect("supervisor should close the session");
    }

    #[tokio::test]
    async fn panicking_task_fails_the_session() {
        let lifecycle = Lifecycle::new();
        let (tx, rx) = mpsc::unbounded_channel::<SessionItem<u8, u8>>();
        let session = Session::new(rx, Arc::clone(&lifecycle));
        let handle = session.cancel_handle();
        let mut tasks = JoinSet::new();
        tasks.spawn(futures::future::pending::<()>());
        tasks.spawn(async { panic!("actor blew up") });
        tokio::spawn(supervise(tasks, Arc::clone(&lifecycle), tx));

        let items: Vec<_> = tokio::time::timeout(Duration::from_secs(1), session.collect())
            .await
            .expect("session should end after the panic");

        assert_eq!(items.len(), 1);
        let err = items[0].as_ref().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Internal);
        assert!(err.cause().to_string().contains("actor blew up"));
        tokio::time::timeout(Duration::from_secs(1), handle.closed())
            .await
            .expect("remaining tasks should be torn down");
    }

    #[tokio::test]
    async fn detached_session_yields_nothing_more() {
        let lifecycle = Lifecycle::new();
        let (tx, rx) = mpsc::unbounded_channel::<SessionItem<u8, u8>>();
        let mut session = Session::new(rx, Arc::clone(&lifecycle));
        tx.send(Ok(1)).unwrap();
        tx.send(Ok(2)).unwrap();

        assert_eq!(session.next().await.unwrap().unwrap(), 1);
        let handle = session.cancel_handle();
        handle.cancel();

        assert!(handle.is_cancelled());
        assert!(session.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_the_session_detaches() {
        let lifecycle = Lifecycle::new();
        let (_tx, rx) = mpsc::unbounded_channel::<SessionItem<u8, u8>>();
        let session = Session::new(rx, Arc::clone(&lifecycle));
        let handle = session.cancel_handle();

        drop(session);

        assert!(handle.is_cancelled());
        assert!(lifecycle.is_stopping());
    }
}
