//! The store engine.
//!
//! `attach` wires one session: upstream forwarder → router ← side effects,
//! router → reducer actor → state cell + observer, reducer actor → side-effect
//! inputs. All tasks live in one `JoinSet` owned by the session supervisor.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::config::{CompletionPolicy, StoreConfig};
use crate::error::{Panicked, StoreError};
use crate::logger::StoreLogger;
use crate::router::{ActionStream, Envelope, Origin, Router, RouterSender};
use crate::session::{supervise, Lifecycle, Session, SessionItem};
use crate::state::{StateAccessor, StateCell};
use crate::traits::{Action, Reducer, SideEffect, State};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

enum InitialState<S> {
    Value(S),
    Supplier(Arc<dyn Fn() -> S + Send + Sync>),
}

impl<S: Clone> InitialState<S> {
    fn resolve(&self) -> S {
        match self {
            InitialState::Value(state) => state.clone(),
            InitialState::Supplier(supplier) => supplier(),
        }
    }
}

impl<S: Clone> Clone for InitialState<S> {
    fn clone(&self) -> Self {
        match self {
            InitialState::Value(state) => InitialState::Value(state.clone()),
            InitialState::Supplier(supplier) => InitialState::Supplier(Arc::clone(supplier)),
        }
    }
}

struct RegisteredEffect<S, A> {
    name: Arc<str>,
    effect: Arc<dyn SideEffect<S, A>>,
}

impl<S, A> Clone for RegisteredEffect<S, A> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            effect: Arc::clone(&self.effect),
        }
    }
}

/// A cold description of a pipeline: initial state, side effects, reducer.
///
/// Nothing runs until [`attach`](Store::attach). Every attach starts an
/// independent session with a freshly evaluated initial state and fresh
/// side-effect executions.
pub struct Store<S, A> {
    initial: InitialState<S>,
    reducer: Arc<dyn Reducer<S, A>>,
    side_effects: Vec<RegisteredEffect<S, A>>,
    logger: Option<Arc<dyn StoreLogger<S, A>>>,
    config: StoreConfig,
}

impl<S: State, A: Action> Clone for Store<S, A> {
    fn clone(&self) -> Self {
        Self {
            initial: self.initial.clone(),
            reducer: Arc::clone(&self.reducer),
            side_effects: self.side_effects.clone(),
            logger: self.logger.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: State, A: Action> Store<S, A> {
    pub fn builder(initial: S, reducer: impl Reducer<S, A>) -> StoreBuilder<S, A> {
        StoreBuilder::new(InitialState::Value(initial), Arc::new(reducer))
    }

    /// Like [`builder`](Store::builder), but the initial state is computed by
    /// `supplier` once per attach.
    pub fn with_supplier<F>(supplier: F, reducer: impl Reducer<S, A>) -> StoreBuilder<S, A>
    where
        F: Fn() -> S + Send + Sync + 'static,
    {
        StoreBuilder::new(InitialState::Supplier(Arc::new(supplier)), Arc::new(reducer))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn side_effect_names(&self) -> Vec<&str> {
        self.side_effects.iter().map(|e| &*e.name).collect()
    }

    /// Start a session fed by `upstream`.
    ///
    /// The returned [`Session`] yields the initial state first. Must be called
    /// from within a Tokio runtime.
    pub fn attach<U>(&self, upstream: U) -> Session<S, A>
    where
        U: Stream<Item = anyhow::Result<A>> + Send + 'static,
    {
        let lifecycle = Lifecycle::new();
        let span = info_span!(
            "store_session",
            store = %self.config.name,
            session_id = %lifecycle.id()
        );

        let initial = self.initial.resolve();
        notify(&self.logger, |logger| logger.on_state_initialized(&initial));
        let cell = StateCell::new(initial.clone());

        let (states_tx, states_rx) = mpsc::unbounded_channel();
        // First item the observer sees, ahead of anything a task can produce.
        let _ = states_tx.send(Ok(initial));

        let (sender, mut router) = Router::new();
        let mut tasks = JoinSet::new();

        for (index, registered) in self.side_effects.iter().enumerate() {
            let input = router.open_outlet(Arc::clone(&registered.name));
            let run = drive_side_effect(
                index,
                registered.clone(),
                input,
                cell.accessor(),
                sender.clone(),
            );
            tasks.spawn(run.instrument(span.clone()));
        }

        let actor = ReducerActor {
            reducer: Arc::clone(&self.reducer),
            logger: self.logger.clone(),
            state: cell,
            router,
            downstream: states_tx.clone(),
            lifecycle: Arc::clone(&lifecycle),
            policy: self.config.on_upstream_complete,
        };
        tasks.spawn(actor.run().instrument(span.clone()));
        tasks.spawn(forward_upstream(upstream, sender).instrument(span.clone()));

        span.in_scope(|| {
            info!(
                side_effects = self.side_effects.len(),
                policy = %self.config.on_upstream_complete,
                "Session attached"
            )
        });
        tokio::spawn(supervise(tasks, Arc::clone(&lifecycle), states_tx).instrument(span));

        Session::new(states_rx, lifecycle)
    }
}

// ---------------------------------------------------------------------------
// StoreBuilder
// ---------------------------------------------------------------------------

pub struct StoreBuilder<S, A> {
    initial: InitialState<S>,
    reducer: Arc<dyn Reducer<S, A>>,
    side_effects: Vec<RegisteredEffect<S, A>>,
    logger: Option<Arc<dyn StoreLogger<S, A>>>,
    config: StoreConfig,
}

impl<S: State, A: Action> StoreBuilder<S, A> {
    fn new(initial: InitialState<S>, reducer: Arc<dyn Reducer<S, A>>) -> Self {
        Self {
            initial,
            reducer,
            side_effects: Vec::new(),
            logger: None,
            config: StoreConfig::default(),
        }
    }

    /// Register a side effect. Registration order only affects diagnostics.
    pub fn side_effect(self, effect: impl SideEffect<S, A>) -> Self {
        let name = format!("side-effect-{}", self.side_effects.len());
        self.named_side_effect(name, effect)
    }

    pub fn named_side_effect(
        mut self,
        name: impl Into<String>,
        effect: impl SideEffect<S, A>,
    ) -> Self {
        let name: String = name.into();
        self.side_effects.push(RegisteredEffect {
            name: Arc::from(name),
            effect: Arc::new(effect),
        });
        self
    }

    pub fn side_effects<I>(mut self, effects: I) -> Self
    where
        I: IntoIterator<Item = Box<dyn SideEffect<S, A>>>,
    {
        for effect in effects {
            let name = format!("side-effect-{}", self.side_effects.len());
            self.side_effects.push(RegisteredEffect {
                name: Arc::from(name),
                effect: Arc::from(effect),
            });
        }
        self
    }

    pub fn logger(mut self, logger: impl StoreLogger<S, A>) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Store<S, A> {
        Store {
            initial: self.initial,
            reducer: self.reducer,
            side_effects: self.side_effects,
            logger: self.logger,
            config: self.config,
        }
    }
}

// ---------------------------------------------------------------------------
// Producers
// ---------------------------------------------------------------------------

/// Run user code, turning a panic into an ordinary error.
async fn guarded<F>(work: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Panicked::from_payload(payload).into()),
    }
}

/// Run a logger hook. A panicking logger is reported and otherwise ignored.
fn notify<S, A>(
    logger: &Option<Arc<dyn StoreLogger<S, A>>>,
    hook: impl FnOnce(&dyn StoreLogger<S, A>),
) {
    let Some(logger) = logger else {
        return;
    };
    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| hook(logger.as_ref()))) {
        warn!(error = %Panicked::from_payload(payload), "Store logger panicked, hook skipped");
    }
}

async fn drive_side_effect<S: State, A: Action>(
    index: usize,
    registered: RegisteredEffect<S, A>,
    input: ActionStream<A>,
    state: StateAccessor<S>,
    router: RouterSender<A>,
) {
    let origin = Origin::SideEffect {
        index,
        name: Arc::clone(&registered.name),
    };

    let pump = async {
        let mut output = registered.effect.run(input, state);
        while let Some(item) = output.next().await {
            if !router.dispatch(item?, origin.clone()) {
                break;
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    match guarded(pump).await {
        Ok(()) => debug!(side_effect = %registered.name, "Side effect completed"),
        Err(error) => {
            warn!(side_effect = %registered.name, error = %error, "Side effect failed");
            router.side_effect_failed(registered.name, error);
        }
    }
}

async fn forward_upstream<U, A>(upstream: U, router: RouterSender<A>)
where
    U: Stream<Item = anyhow::Result<A>> + Send + 'static,
    A: Action,
{
    let pump = async {
        let mut upstream = std::pin::pin!(upstream);
        while let Some(item) = upstream.next().await {
            if !router.dispatch(item?, Origin::Upstream) {
                return Ok(());
            }
        }
        debug!("Upstream completed");
        router.upstream_completed();
        Ok::<(), anyhow::Error>(())
    };

    if let Err(error) = guarded(pump).await {
        warn!(error = %error, "Upstream failed");
        router.upstream_failed(error);
    }
}

// ---------------------------------------------------------------------------
// Reducer actor
// ---------------------------------------------------------------------------

enum Outcome<S, A> {
    Completed,
    Failed(StoreError<S, A>),
    Detached,
}

/// The only consumer of the router and the only writer of the state cell.
struct ReducerActor<S, A> {
    reducer: Arc<dyn Reducer<S, A>>,
    logger: Option<Arc<dyn StoreLogger<S, A>>>,
    state: StateCell<S>,
    router: Router<A>,
    downstream: mpsc::UnboundedSender<SessionItem<S, A>>,
    lifecycle: Arc<Lifecycle>,
    policy: CompletionPolicy,
}

impl<S: State, A: Action> ReducerActor<S, A> {
    async fn run(mut self) {
        let outcome = self.drain().await;
        self.router.close();

        match outcome {
            Outcome::Completed => info!("Session completed"),
            Outcome::Failed(err) => {
                error!(kind = ?err.kind(), error = %err, "Session failed");
                let _ = self.downstream.send(Err(err));
            }
            Outcome::Detached => debug!("Reducer stopped after detach"),
        }

        self.lifecycle.stop();
    }

    async fn drain(&mut self) -> Outcome<S, A> {
        while let Some(envelope) = self.router.next().await {
            if self.lifecycle.is_stopping() {
                return Outcome::Detached;
            }

            match envelope {
                Envelope::Action { action, origin } => match self.reduce(action, &origin) {
                    Ok(true) => {}
                    Ok(false) => return Outcome::Detached,
                    Err(err) => return Outcome::Failed(err),
                },
                Envelope::SideEffectFailed { name, error } => {
                    let current = self.state.load();
                    notify(&self.logger, |logger| {
                        logger.on_side_effect_error(&current, &error)
                    });
                    return Outcome::Failed(StoreError::SideEffect {
                        name: name.to_string(),
                        source: error.into(),
                    });
                }
                Envelope::UpstreamFailed(error) => {
                    return Outcome::Failed(StoreError::Upstream {
                        source: error.into(),
                    });
                }
                Envelope::UpstreamCompleted => match self.policy {
                    CompletionPolicy::Complete => return Outcome::Completed,
                    CompletionPolicy::KeepAlive => {
                        debug!(
                            side_effects = self.router.outlet_count(),
                            "Upstream completed, keeping side effects alive"
                        );
                    }
                },
            }
        }

        debug!("Every producer finished");
        Outcome::Completed
    }

    /// Reduce one action, publish and emit the new state, then hand the action
    /// to the side effects. Returns `Ok(false)` once the observer is gone.
    fn reduce(&mut self, action: A, origin: &Origin) -> Result<bool, StoreError<S, A>> {
        let current = self.state.load();
        notify(&self.logger, |logger| logger.on_action_received(&action, &current));
        trace!(?origin, ?action, "Reducing action");

        let reducer = &self.reducer;
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| reducer.reduce(&current, &action)))
            .unwrap_or_else(|payload| Err(Panicked::from_payload(payload).into()));

        let next = match result {
            Ok(next) => next,
            Err(error) => {
                notify(&self.logger, |logger| {
                    logger.on_reduce_error(&action, &current, &error)
                });
                return Err(StoreError::Reducer {
                    state: S::clone(&current),
                    action,
                    source: error.into(),
                });
            }
        };

        self.state.publish(next.clone());
        notify(&self.logger, |logger| logger.on_state_updated(&current, &next, &action));
        let delivered = self.downstream.send(Ok(next)).is_ok();

        // Published before broadcast: a side effect handling `action` reads a
        // state that already includes it.
        self.router.broadcast(&action);
        Ok(delivered)
    }
}
