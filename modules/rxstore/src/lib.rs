//! Reactive state container.
//!
//! Actions from an upstream source and from side effects are merged into one
//! queue, reduced one at a time against the current state, and every new state
//! is streamed to the observer of the session.
//!
//! ```text
//! upstream ──┐
//!            ├─→ router ─→ reducer ─→ state cell ─→ observer
//! effects ───┘                │
//!    ↑                        │
//!    └──── broadcast ─────────┘
//! ```
//!
//! Consumers define their domain by implementing [`Reducer`] (pure state
//! transitions) and [`SideEffect`] (impure reactions that emit new actions),
//! then [`Store::attach`] an action stream to get a [`Session`].

mod config;
mod engine;
mod error;
mod ext;
mod logger;
mod router;
mod session;
mod state;
mod traits;

pub use config::{CompletionPolicy, StoreConfig};
pub use engine::{Store, StoreBuilder};
pub use error::{BoxError, ConfigError, ErrorKind, StoreError};
pub use ext::ActionStreamExt;
pub use logger::{StoreLogger, TracingLogger};
pub use router::{ActionStream, Origin};
pub use session::{CancelHandle, Session, SessionItem};
pub use state::StateAccessor;
pub use traits::{reducer_fn, side_effect_fn, Action, ActionOutput, Reducer, SideEffect, State};
