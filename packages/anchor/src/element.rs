//! The element contract and loopback references.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::error::{AnchorError, Result};

/// A lifecycle-managed resource held in an anchor slot.
#[async_trait]
pub trait Element: Send + Sync + 'static {
    /// Kind token this element was made under.
    fn kind(&self) -> &str;

    /// Release the underlying resource. Idempotent.
    async fn scrub(&self);

    /// Serialized status snapshot. Never fails; an element that cannot
    /// describe itself returns an empty buffer.
    async fn peek_bytes(&self) -> Vec<u8> {
        Vec::new()
    }

    /// Erase to `Any` so references can be downcast to the concrete type.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Shared handle to an element.
pub type ElementRef = Arc<dyn Element>;

/// Address of an element's data, ignoring the vtable.
pub(crate) fn element_addr<T: ?Sized>(elem: &T) -> usize {
    elem as *const T as *const () as usize
}

#[derive(Clone)]
enum Target {
    Weak(Weak<dyn Any + Send + Sync>),
    Perm(Arc<dyn Any + Send + Sync>),
}

/// A remotely-callable reference to an element or terminal.
///
/// Element references do not own their target: once the anchor is scrubbed
/// and the last local owner goes away, every call through the reference
/// fails with [`AnchorError::RemoteUnavailable`]. Terminal references own
/// theirs, since terminals are recreated on every traversal.
#[derive(Clone)]
pub struct XRef {
    kind: String,
    target: Target,
}

impl XRef {
    /// Non-owning reference to an element.
    pub fn of(elem: &ElementRef) -> Self {
        let erased = Arc::clone(elem).as_any();
        XRef {
            kind: elem.kind().to_string(),
            target: Target::Weak(Arc::downgrade(&erased)),
        }
    }

    /// Non-owning reference to any shared value.
    pub fn weak<T: Any + Send + Sync>(kind: &str, target: &Arc<T>) -> Self {
        let erased: Arc<dyn Any + Send + Sync> = Arc::clone(target) as _;
        XRef {
            kind: kind.to_string(),
            target: Target::Weak(Arc::downgrade(&erased)),
        }
    }

    /// Owning reference.
    pub fn perm<T: Any + Send + Sync>(kind: &str, target: Arc<T>) -> Self {
        XRef {
            kind: kind.to_string(),
            target: Target::Perm(target),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn is_alive(&self) -> bool {
        match &self.target {
            Target::Weak(w) => w.strong_count() > 0,
            Target::Perm(_) => true,
        }
    }

    /// Resolve the reference to its concrete target.
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>> {
        let target = match &self.target {
            Target::Weak(w) => w
                .upgrade()
                .ok_or_else(|| AnchorError::RemoteUnavailable(self.kind.clone()))?,
            Target::Perm(a) => Arc::clone(a),
        };
        target
            .downcast::<T>()
            .map_err(|_| AnchorError::TypeMismatch(self.kind.clone()))
    }
}

impl fmt::Debug for dyn Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Element").field("kind", &self.kind()).finish()
    }
}

impl fmt::Debug for XRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XRef")
            .field("kind", &self.kind)
            .field("alive", &self.is_alive())
            .finish()
    }
}
