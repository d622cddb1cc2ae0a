//! Anchor namespace for circuit servers.
//!
//! Every server exposes a tree of *anchors*. An anchor may hold one
//! *element*: a process, a channel, a container, a name server, a
//! subscription. Elements are built by kind through an [`ElementRegistry`]
//! and managed through a [`Terminal`] bound to one anchor.
//!
//! ```rust,ignore
//! let term = circuit.terminal();
//! let jobs = term.walk(&["X3f0a", "jobs", "build"]);
//! let proc = jobs.make("proc", Value::encode(&cmd)?).await?;
//! jobs.scrub().await;
//! ```

use std::sync::{Mutex, MutexGuard};

pub mod anchor;
pub mod client;
pub mod element;
pub mod error;
pub mod path;
pub mod pubsub;
pub mod registry;
pub mod server;
pub mod terminal;
pub mod value;

pub use anchor::{AnchorNode, Slot};
pub use client::{YElement, YTerminal};
pub use element::{Element, ElementRef, XRef};
pub use error::{AnchorError, Result};
pub use path::{AnchorPath, PathError};
pub use pubsub::{Publisher, Subscription, SubscriptionStat, SUBSCRIPTION_BACKLOG};
pub use registry::{adapter_for, ElementFactory, ElementRegistry, RemoteAdapter, YSubscription};
pub use server::{ServerElement, ServerStat, YServer};
pub use terminal::Genus;
pub use terminal::Terminal;
pub use value::Value;

/// Kind tokens.
pub mod kind {
    pub use crate::terminal::{
        CHAN, CONTAINER, DOCKER, NAMESERVER, NETWORK, ON_JOIN, ON_LEAVE, POD, PROC, SERVER,
        TERMINAL, VOLUME, WASM,
    };
}

/// Lock a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
