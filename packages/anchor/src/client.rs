//! Client-side mirror of the anchor facade.
//!
//! A `YTerminal` is what a caller on the other side of the remote boundary
//! holds. Elements come back wrapped in their kind's client handle.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use crate::element::XRef;
use crate::error::{AnchorError, Result};
use crate::terminal::Terminal;
use crate::value::Value;

/// An element as seen by a client: its kind and its adapted handle.
pub struct YElement {
    kind: String,
    x: XRef,
    handle: Box<dyn Any + Send + Sync>,
}

impl YElement {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn x(&self) -> &XRef {
        &self.x
    }

    /// Take the handle as the concrete client type of the kind.
    pub fn into_handle<Y: Any>(self) -> Result<Y> {
        self.handle
            .downcast::<Y>()
            .map(|y| *y)
            .map_err(|_| AnchorError::TypeMismatch(self.kind))
    }
}

impl fmt::Debug for YElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("YElement").field("kind", &self.kind).finish()
    }
}

/// Client view of one anchor.
#[derive(Clone, Debug)]
pub struct YTerminal {
    x: XRef,
}

impl YTerminal {
    pub fn new(x: XRef) -> Self {
        YTerminal { x }
    }

    fn term(&self) -> Result<std::sync::Arc<Terminal>> {
        self.x.resolve::<Terminal>()
    }

    fn wrap(&self, term: &Terminal, x: XRef) -> Result<YElement> {
        let kind = x.kind().to_string();
        let handle = term.registry().adapt(x.clone())?;
        Ok(YElement { kind, x, handle })
    }

    pub fn walk<S: AsRef<str>>(&self, path: &[S]) -> Result<YTerminal> {
        Ok(YTerminal::new(self.term()?.walk(path).x()))
    }

    pub fn view(&self) -> Result<BTreeMap<String, YTerminal>> {
        Ok(self
            .term()?
            .view()
            .into_iter()
            .map(|(name, t)| (name, YTerminal::new(t.x())))
            .collect())
    }

    pub fn path(&self) -> Result<String> {
        Ok(self.term()?.path())
    }

    pub async fn make(&self, kind: &str, arg: Value) -> Result<YElement> {
        let term = self.term()?;
        let element = term.make(kind, arg).await?;
        self.wrap(&term, XRef::of(&element))
    }

    pub async fn get(&self) -> Result<Option<YElement>> {
        let term = self.term()?;
        match term.get().await {
            Some((_, element)) => Ok(Some(self.wrap(&term, XRef::of(&element))?)),
            None => Ok(None),
        }
    }

    pub async fn scrub(&self) -> Result<()> {
        self.term()?.scrub().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::AnchorNode;
    use crate::pubsub::{Publisher, Subscription};
    use crate::registry::{ElementRegistry, YSubscription};
    use crate::server::{ServerElement, YServer};
    use crate::terminal::{Genus, ON_JOIN, ON_LEAVE, SERVER};
    use std::sync::Arc;

    struct Membership {
        join: Publisher,
        leave: Publisher,
    }

    impl Genus for Membership {
        fn new_arrivals(&self) -> Arc<Subscription> {
            self.join.subscribe()
        }

        fn new_departures(&self) -> Arc<Subscription> {
            self.leave.subscribe()
        }
    }

    fn setup() -> (Terminal, Arc<Membership>) {
        let genus = Arc::new(Membership {
            join: Publisher::new("join", ON_JOIN),
            leave: Publisher::new("leave", ON_LEAVE),
        });
        let term = Terminal::new(
            AnchorNode::root("circuit"),
            genus.clone(),
            Arc::new(ElementRegistry::with_builtins()),
        );
        (term, genus)
    }

    #[tokio::test]
    async fn make_returns_adapted_handle() {
        let (term, genus) = setup();
        let y = YTerminal::new(term.x()).walk(&["watch"]).unwrap();
        let elem = y.make(ON_JOIN, Value::Null).await.unwrap();
        assert_eq!(elem.kind(), ON_JOIN);

        let sub: YSubscription = elem.into_handle().unwrap();
        genus.join.publish(Value::from("X2"));
        assert_eq!(sub.consume().await.unwrap(), Some(Value::from("X2")));
    }

    #[tokio::test]
    async fn get_on_server_anchor() {
        let (term, _genus) = setup();
        term.walk(&["X1"])
            .attach(SERVER, Arc::new(ServerElement::new("X1", "h:1")))
            .await;

        let y = YTerminal::new(term.x());
        let view = y.view().unwrap();
        assert_eq!(view["X1"].path().unwrap(), "/X1");

        let server: YServer = view["X1"]
            .get()
            .await
            .unwrap()
            .unwrap()
            .into_handle()
            .unwrap();
        assert_eq!(server.peek().unwrap().addr, "h:1");
    }

    #[tokio::test]
    async fn scrubbed_element_becomes_unavailable() {
        let (term, _genus) = setup();
        let y = YTerminal::new(term.walk(&["s"]).x());
        let sub: YSubscription = y
            .make(ON_LEAVE, Value::Null)
            .await
            .unwrap()
            .into_handle()
            .unwrap();
        y.scrub().await.unwrap();
        assert!(y.get().await.unwrap().is_none());
        assert!(matches!(
            sub.peek(),
            Err(AnchorError::RemoteUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn wrong_handle_type_is_mismatch() {
        let (term, _genus) = setup();
        let y = YTerminal::new(term.walk(&["s"]).x());
        let elem = y.make(ON_JOIN, Value::Null).await.unwrap();
        assert!(matches!(
            elem.into_handle::<YServer>(),
            Err(AnchorError::TypeMismatch(_))
        ));
    }
}
