//! The anchor facade.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use crate::anchor::{AnchorNode, Slot};
use crate::element::{element_addr, ElementRef, XRef};
use crate::error::{AnchorError, Result};
use crate::lock;
use crate::path::AnchorPath;
use crate::pubsub::Subscription;
use crate::registry::ElementRegistry;
use crate::value::Value;

pub const SERVER: &str = "server";
pub const CHAN: &str = "chan";
pub const PROC: &str = "proc";
pub const DOCKER: &str = "docker";
pub const NAMESERVER: &str = "dns";
pub const ON_JOIN: &str = "@join";
pub const ON_LEAVE: &str = "@leave";
pub const WASM: &str = "wasm";
pub const POD: &str = "pod";
pub const CONTAINER: &str = "container";
pub const NETWORK: &str = "network";
pub const VOLUME: &str = "volume";

/// Kind token under which terminals themselves are referenced.
pub const TERMINAL: &str = "terminal";

/// Cluster membership notifier.
pub trait Genus: Send + Sync {
    /// Subscription to servers joining the cluster.
    fn new_arrivals(&self) -> Arc<Subscription>;
    /// Subscription to servers leaving the cluster.
    fn new_departures(&self) -> Arc<Subscription>;
}

struct Context {
    genus: Arc<dyn Genus>,
    registry: Arc<ElementRegistry>,
}

/// Operation surface of one anchor.
///
/// Cheap to clone. Every traversal produces a new terminal sharing the
/// cluster context of the one it started from.
#[derive(Clone)]
pub struct Terminal {
    node: Arc<AnchorNode>,
    ctx: Arc<Context>,
}

impl Terminal {
    pub fn new(root: Arc<AnchorNode>, genus: Arc<dyn Genus>, registry: Arc<ElementRegistry>) -> Self {
        Terminal {
            node: root,
            ctx: Arc::new(Context { genus, registry }),
        }
    }

    fn at(&self, node: Arc<AnchorNode>) -> Terminal {
        Terminal {
            node,
            ctx: Arc::clone(&self.ctx),
        }
    }

    pub fn genus(&self) -> &Arc<dyn Genus> {
        &self.ctx.genus
    }

    pub fn registry(&self) -> &Arc<ElementRegistry> {
        &self.ctx.registry
    }

    pub fn node(&self) -> &Arc<AnchorNode> {
        &self.node
    }

    pub fn name(&self) -> &str {
        self.node.name()
    }

    pub fn walk<S: AsRef<str>>(&self, path: &[S]) -> Terminal {
        let node = AnchorNode::walk(&self.node, path);
        debug!(from = %self.node.path(), to = %node.path(), "walk");
        self.at(node)
    }

    pub fn walk_path(&self, path: &AnchorPath) -> Terminal {
        self.walk(&path.segments)
    }

    pub fn view(&self) -> BTreeMap<String, Terminal> {
        self.node
            .view()
            .into_iter()
            .map(|(name, node)| (name, self.at(node)))
            .collect()
    }

    pub fn path(&self) -> String {
        self.node.path()
    }

    /// Install an element created by membership logic.
    ///
    /// # Panics
    ///
    /// Panics for any kind other than `server`, or if the anchor is
    /// occupied.
    pub async fn attach(&self, kind: &str, element: ElementRef) {
        let _tx = self.node.tx.lock().await;
        if kind != SERVER {
            panic!("cannot attach {} element at {}", kind, self.node.path());
        }
        let mut slot = lock(&self.node.slot);
        if slot.is_some() {
            panic!("anchor {} already has an element", self.node.path());
        }
        *slot = Some(Slot {
            kind: kind.to_string(),
            element,
        });
        info!(anchor = %self.node.path(), kind, "attached element");
    }

    /// Install a `server` element unless the anchor is already occupied.
    /// Returns whether the element was installed; other kinds are refused.
    pub async fn try_attach(&self, kind: &str, element: ElementRef) -> bool {
        let _tx = self.node.tx.lock().await;
        if kind != SERVER {
            return false;
        }
        let mut slot = lock(&self.node.slot);
        if slot.is_some() {
            debug!(anchor = %self.node.path(), "attach refused, anchor occupied");
            return false;
        }
        *slot = Some(Slot {
            kind: kind.to_string(),
            element,
        });
        info!(anchor = %self.node.path(), kind, "attached element");
        true
    }

    /// Remove a `server` element placed by `attach`. Returns whether one
    /// was removed. Other kinds are left alone.
    pub async fn detach(&self) -> bool {
        let _tx = self.node.tx.lock().await;
        let mut slot = lock(&self.node.slot);
        if !matches!(&*slot, Some(s) if s.kind == SERVER) {
            return false;
        }
        *slot = None;
        info!(anchor = %self.node.path(), "detached server element");
        true
    }

    /// Create an element of `kind` in this anchor.
    pub async fn make(&self, kind: &str, arg: Value) -> Result<ElementRef> {
        let _tx = self.node.tx.lock().await;
        if lock(&self.node.slot).is_some() {
            return Err(AnchorError::AlreadyOccupied);
        }
        let factory = self
            .ctx
            .registry
            .factory(kind)
            .ok_or_else(|| AnchorError::UnknownKind(kind.to_string()))?;

        let element = match factory.make(self, arg).await {
            Ok(element) => element,
            Err(err) => {
                debug!(anchor = %self.node.path(), kind, error = %err, "make failed");
                return Err(err);
            }
        };
        *lock(&self.node.slot) = Some(Slot {
            kind: kind.to_string(),
            element: Arc::clone(&element),
        });
        info!(anchor = %self.node.path(), kind, "made element");
        Ok(element)
    }

    /// The kind and element held here, if any.
    pub async fn get(&self) -> Option<(String, ElementRef)> {
        let _tx = self.node.tx.lock().await;
        self.node.peek_slot().map(|s| (s.kind, s.element))
    }

    /// Destroy the element held here. `server` elements are left alone.
    pub async fn scrub(&self) {
        let _tx = self.node.tx.lock().await;
        let Some(slot) = self.node.peek_slot() else {
            return;
        };
        if slot.kind == SERVER {
            debug!(anchor = %self.node.path(), "ignoring scrub of server element");
            return;
        }
        slot.element.scrub().await;
        *lock(&self.node.slot) = None;
        info!(anchor = %self.node.path(), kind = %slot.kind, "scrubbed element");
    }

    /// Scrub this anchor if it still holds `element`.
    ///
    /// Used by elements that remove themselves once finished. A newer
    /// element made after a manual scrub is left in place.
    pub async fn release<T: ?Sized + Sync>(&self, element: &T) {
        let target = element_addr(element);
        let _tx = self.node.tx.lock().await;
        let Some(slot) = self.node.peek_slot() else {
            return;
        };
        if element_addr(&*slot.element) != target {
            return;
        }
        slot.element.scrub().await;
        *lock(&self.node.slot) = None;
        info!(anchor = %self.node.path(), kind = %slot.kind, "released finished element");
    }

    /// A reference to this terminal for clients.
    pub fn x(&self) -> XRef {
        XRef::perm(TERMINAL, Arc::new(self.clone()))
    }
}

impl fmt::Debug for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Terminal")
            .field("path", &self.node.path())
            .finish()
    }
}
