//! Kind-to-constructor registry.
//!
//! Every element module registers a factory and a remote adapter under its
//! kind token before the server takes traffic. The anchor engine only ever
//! dispatches through this table.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::element::{Element, ElementRef, XRef};
use crate::error::{AnchorError, Result};
use crate::pubsub::{Subscription, SubscriptionStat};
use crate::server::{ServerFactory, YServer};
use crate::terminal::{Terminal, ON_JOIN, ON_LEAVE, SERVER};
use crate::value::Value;

/// Builds a local element for an anchor.
#[async_trait]
pub trait ElementFactory: Send + Sync {
    async fn make(&self, term: &Terminal, arg: Value) -> Result<ElementRef>;
}

/// Wraps a remote reference into the kind's client handle.
pub trait RemoteAdapter: Send + Sync {
    fn adapt(&self, x: XRef) -> Box<dyn Any + Send + Sync>;
}

impl<F> RemoteAdapter for F
where
    F: Fn(XRef) -> Box<dyn Any + Send + Sync> + Send + Sync,
{
    fn adapt(&self, x: XRef) -> Box<dyn Any + Send + Sync> {
        self(x)
    }
}

/// Adapter for client handles that are built straight from a reference.
pub fn adapter_for<Y>() -> impl RemoteAdapter
where
    Y: From<XRef> + Any + Send + Sync,
{
    |x: XRef| Box::new(Y::from(x)) as Box<dyn Any + Send + Sync>
}

#[derive(Clone)]
struct Entry {
    factory: Arc<dyn ElementFactory>,
    adapter: Arc<dyn RemoteAdapter>,
}

/// Concurrent map from kind token to factory and adapter.
#[derive(Default)]
pub struct ElementRegistry {
    kinds: RwLock<BTreeMap<String, Entry>>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the kinds every server carries: `server`,
    /// `@join` and `@leave`.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(SERVER, ServerFactory, adapter_for::<YServer>());
        registry.register(
            ON_JOIN,
            SubscriptionFactory { join: true },
            adapter_for::<YSubscription>(),
        );
        registry.register(
            ON_LEAVE,
            SubscriptionFactory { join: false },
            adapter_for::<YSubscription>(),
        );
        registry
    }

    /// Register a kind.
    ///
    /// # Panics
    ///
    /// Panics if the kind is already registered. Registration happens while
    /// the server is being assembled, so a duplicate is a build mistake.
    pub fn register<F, A>(&self, kind: &str, factory: F, adapter: A)
    where
        F: ElementFactory + 'static,
        A: RemoteAdapter + 'static,
    {
        if let Err(err) = self.try_register(kind, factory, adapter) {
            panic!("{}", err);
        }
    }

    /// Register a kind, reporting duplicates as an error.
    pub fn try_register<F, A>(&self, kind: &str, factory: F, adapter: A) -> Result<()>
    where
        F: ElementFactory + 'static,
        A: RemoteAdapter + 'static,
    {
        let mut kinds = self
            .kinds
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if kinds.contains_key(kind) {
            return Err(AnchorError::AlreadyRegistered(kind.to_string()));
        }
        kinds.insert(
            kind.to_string(),
            Entry {
                factory: Arc::new(factory),
                adapter: Arc::new(adapter),
            },
        );
        Ok(())
    }

    fn entry(&self, kind: &str) -> Option<Entry> {
        self.kinds
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(kind)
            .cloned()
    }

    pub fn lookup(&self, kind: &str) -> Option<(Arc<dyn ElementFactory>, Arc<dyn RemoteAdapter>)> {
        self.entry(kind).map(|e| (e.factory, e.adapter))
    }

    pub fn factory(&self, kind: &str) -> Option<Arc<dyn ElementFactory>> {
        self.entry(kind).map(|e| e.factory)
    }

    pub fn adapter(&self, kind: &str) -> Option<Arc<dyn RemoteAdapter>> {
        self.entry(kind).map(|e| e.adapter)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entry(kind).is_some()
    }

    /// Registered kinds in sorted order.
    pub fn kinds(&self) -> Vec<String> {
        self.kinds
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Wrap a reference into the client handle of its kind.
    pub fn adapt(&self, x: XRef) -> Result<Box<dyn Any + Send + Sync>> {
        let adapter = self
            .adapter(x.kind())
            .ok_or_else(|| AnchorError::UnknownKind(x.kind().to_string()))?;
        Ok(adapter.adapt(x))
    }
}

struct SubscriptionFactory {
    join: bool,
}

#[async_trait]
impl ElementFactory for SubscriptionFactory {
    async fn make(&self, term: &Terminal, _arg: Value) -> Result<ElementRef> {
        let genus = term.genus();
        let sub: ElementRef = if self.join {
            genus.new_arrivals()
        } else {
            genus.new_departures()
        };
        Ok(sub)
    }
}

/// Client handle for `@join` and `@leave` elements.
#[derive(Clone, Debug)]
pub struct YSubscription {
    x: XRef,
}

impl From<XRef> for YSubscription {
    fn from(x: XRef) -> Self {
        YSubscription { x }
    }
}

impl YSubscription {
    pub async fn consume(&self) -> Result<Option<Value>> {
        Ok(self.x.resolve::<Subscription>()?.consume().await)
    }

    pub fn peek(&self) -> Result<SubscriptionStat> {
        Ok(self.x.resolve::<Subscription>()?.peek())
    }

    pub async fn scrub(&self) -> Result<()> {
        self.x.resolve::<Subscription>()?.scrub().await;
        Ok(())
    }
}
