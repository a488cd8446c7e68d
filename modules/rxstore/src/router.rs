//! The merge point between producers and the reducer.
//!
//! Every producer (the upstream forwarder and one task per side effect) holds a
//! [`RouterSender`] clone writing into one unbounded channel. The reducer actor
//! is the only consumer. After each reduction it broadcasts the action to every
//! side-effect input through that side effect's own unbounded channel, so a
//! slow side effect never stalls the reducer or its siblings.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::mpsc as fanout;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

// ---------------------------------------------------------------------------
// Producer side
// ---------------------------------------------------------------------------

/// Who put an action into the router. Diagnostic only, never affects order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Upstream,
    SideEffect { index: usize, name: Arc<str> },
}

/// One message on the merged channel.
pub(crate) enum Envelope<A> {
    Action { action: A, origin: Origin },
    SideEffectFailed { name: Arc<str>, error: anyhow::Error },
    UpstreamFailed(anyhow::Error),
    UpstreamCompleted,
}

/// Producer handle onto the merged channel.
pub(crate) struct RouterSender<A> {
    tx: mpsc::UnboundedSender<Envelope<A>>,
}

impl<A> Clone for RouterSender<A> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<A> RouterSender<A> {
    /// Enqueue an action. Returns `false` once the reducer side is gone.
    pub(crate) fn dispatch(&self, action: A, origin: Origin) -> bool {
        self.send(Envelope::Action { action, origin })
    }

    pub(crate) fn side_effect_failed(&self, name: Arc<str>, error: anyhow::Error) -> bool {
        self.send(Envelope::SideEffectFailed { name, error })
    }

    pub(crate) fn upstream_failed(&self, error: anyhow::Error) -> bool {
        self.send(Envelope::UpstreamFailed(error))
    }

    pub(crate) fn upstream_completed(&self) -> bool {
        self.send(Envelope::UpstreamCompleted)
    }

    fn send(&self, envelope: Envelope<A>) -> bool {
        self.tx.send(envelope).is_ok()
    }
}

// ---------------------------------------------------------------------------
// Side-effect input view
// ---------------------------------------------------------------------------

/// The broadcast action stream as seen by one side effect.
///
/// Yields every reduced action in reduction order. Ends when the session
/// is torn down.
pub struct ActionStream<A> {
    rx: fanout::UnboundedReceiver<A>,
}

impl<A> ActionStream<A> {
    /// A standalone input, for driving a side effect outside a store.
    pub fn channel() -> (fanout::UnboundedSender<A>, Self) {
        let (tx, rx) = fanout::unbounded();
        (tx, Self { rx })
    }
}

impl<A> Stream for ActionStream<A> {
    type Item = A;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<A>> {
        Pin::new(&mut self.rx).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rx.size_hint()
    }
}

struct Outlet<A> {
    name: Arc<str>,
    tx: fanout::UnboundedSender<A>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Consumer half: merged inbox plus the fan-out list of side-effect inputs.
pub(crate) struct Router<A> {
    inbox: mpsc::UnboundedReceiver<Envelope<A>>,
    outlets: Vec<Outlet<A>>,
}

impl<A: Clone> Router<A> {
    pub(crate) fn new() -> (RouterSender<A>, Self) {
        let (tx, inbox) = mpsc::unbounded_channel();
        (
            RouterSender { tx },
            Self {
                inbox,
                outlets: Vec::new(),
            },
        )
    }

    /// Register a side-effect input. Must happen before the first broadcast
    /// the side effect is expected to see.
    pub(crate) fn open_outlet(&mut self, name: Arc<str>) -> ActionStream<A> {
        let (tx, stream) = ActionStream::channel();
        self.outlets.push(Outlet { name, tx });
        stream
    }

    /// Next envelope in arrival order. `None` once every producer is gone.
    pub(crate) async fn next(&mut self) -> Option<Envelope<A>> {
        self.inbox.recv().await
    }

    /// Hand a reduced action to every side-effect input.
    ///
    /// Inputs whose side effect has dropped its stream are pruned.
    pub(crate) fn broadcast(&mut self, action: &A) {
        self.outlets.retain(|outlet| {
            let open = outlet.tx.unbounded_send(action.clone()).is_ok();
            if !open {
                debug!(side_effect = %outlet.name, "Side effect stopped reading actions");
            }
            open
        });
    }

    pub(crate) fn outlet_count(&self) -> usize {
        self.outlets.len()
    }

    /// Stop accepting envelopes and close every side-effect input.
    pub(crate) fn close(&mut self) {
        self.inbox.close();
        for outlet in &self.outlets {
            outlet.tx.close_channel();
        }
    }
}
