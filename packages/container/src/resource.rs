//! The `pod`, `network` and `volume` elements.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use circuit_anchor::{Element, ElementFactory, ElementRef, Terminal, Value, XRef};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

use crate::error::{ContainerError, Result};
use crate::run::{decode_arg, Create, Noun};
use crate::tool::{element_name, parse_json_array_first, Tool};

/// A named runtime object created on make and removed on scrub.
pub struct Resource {
    kind: &'static str,
    noun: Noun,
    tool: Tool,
    name: String,
    id: String,
    removed: AtomicBool,
}

impl Resource {
    pub async fn create(
        kind: &'static str,
        noun: Noun,
        tool: Tool,
        opts: &Create,
    ) -> Result<Resource> {
        let name = element_name(opts.name.as_deref());
        let out = tool.output(&noun.create_args(&name, &opts.options)).await?;
        let id = String::from_utf8_lossy(&out).trim().to_string();
        info!(tool = tool.name(), %noun, %name, %id, "resource created");
        Ok(Resource {
            kind,
            noun,
            tool,
            name,
            id,
            removed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier printed by the tool on creation.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn noun(&self) -> Noun {
        self.noun
    }

    pub async fn inspect(&self) -> Result<Json> {
        let out = self.tool.output(&self.noun.inspect_args(&self.name)).await?;
        parse_json_array_first(&out)
    }

    pub async fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(noun = %self.noun, name = %self.name, "removing resource");
        if let Err(err) = self.tool.run(&self.noun.rm_args(&self.name)).await {
            warn!(noun = %self.noun, name = %self.name, %err, "resource removal failed");
        }
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        if !self.removed.load(Ordering::SeqCst) {
            debug!(noun = %self.noun, name = %self.name, "resource dropped without scrub");
            self.tool.run_detached(self.noun.rm_args(&self.name));
        }
    }
}

#[async_trait]
impl Element for Resource {
    fn kind(&self) -> &str {
        self.kind
    }

    async fn scrub(&self) {
        self.remove().await;
    }

    async fn peek_bytes(&self) -> Vec<u8> {
        match self.inspect().await {
            Ok(rec) => serde_json::to_vec_pretty(&rec).unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub struct ResourceFactory {
    kind: &'static str,
    noun: Noun,
    tool: Option<Tool>,
}

impl ResourceFactory {
    pub fn new(kind: &'static str, noun: Noun, tool: Option<Tool>) -> Self {
        ResourceFactory { kind, noun, tool }
    }
}

#[async_trait]
impl ElementFactory for ResourceFactory {
    async fn make(&self, term: &Terminal, arg: Value) -> circuit_anchor::Result<ElementRef> {
        let tool = self
            .tool
            .clone()
            .ok_or_else(|| ContainerError::ToolUnavailable(self.kind.to_string()))?;
        let opts: Create = decode_arg(self.kind, &arg)?;
        let res = Resource::create(self.kind, self.noun, tool, &opts).await?;
        debug!(anchor = %term.path(), name = res.name(), "resource element made");
        Ok(Arc::new(res))
    }
}

/// Client handle for `pod`, `network` and `volume` elements.
#[derive(Clone, Debug)]
pub struct YResource {
    x: XRef,
}

impl From<XRef> for YResource {
    fn from(x: XRef) -> Self {
        YResource { x }
    }
}

impl YResource {
    fn elem(&self) -> circuit_anchor::Result<Arc<Resource>> {
        self.x.resolve::<Resource>()
    }

    pub fn name(&self) -> circuit_anchor::Result<String> {
        Ok(self.elem()?.name().to_string())
    }

    pub fn id(&self) -> circuit_anchor::Result<String> {
        Ok(self.elem()?.id().to_string())
    }

    pub async fn peek(&self) -> circuit_anchor::Result<Json> {
        Ok(self.elem()?.inspect().await?)
    }

    pub async fn scrub(&self) -> circuit_anchor::Result<()> {
        self.elem()?.remove().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{calls, fake_tool};
    use circuit_anchor::kind::{NETWORK, POD, VOLUME};
    use circuit_anchor::{adapter_for, AnchorNode, ElementRegistry, Genus, Publisher, Subscription};
    use collection_literals::btree;

    struct Alone {
        join: Publisher,
        leave: Publisher,
    }

    impl Genus for Alone {
        fn new_arrivals(&self) -> Arc<Subscription> {
            self.join.subscribe()
        }

        fn new_departures(&self) -> Arc<Subscription> {
            self.leave.subscribe()
        }
    }

    fn terminal(tool: Option<Tool>) -> Terminal {
        let registry = ElementRegistry::with_builtins();
        for (kind, noun) in [(POD, Noun::Pod), (NETWORK, Noun::Network), (VOLUME, Noun::Volume)] {
            registry.register(
                kind,
                ResourceFactory::new(kind, noun, tool.clone()),
                adapter_for::<YResource>(),
            );
        }
        Terminal::new(
            AnchorNode::root("circuit"),
            Arc::new(Alone {
                join: Publisher::new("join", "@join"),
                leave: Publisher::new("leave", "@leave"),
            }),
            Arc::new(registry),
        )
    }

    #[tokio::test]
    async fn refuses_without_tool() {
        let t = terminal(None).walk(&["v"]);
        let err = t.make(VOLUME, Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "volume not enabled on this server");
    }

    #[tokio::test]
    async fn pod_lifecycle() {
        let t = terminal(Some(fake_tool())).walk(&["p"]);
        let arg = Value::from(btree! {
            "name".to_string() => Value::from("pod-test"),
            "options".to_string() => Value::from(vec![Value::from("--share=net")]),
        });
        let elem = t.make(POD, arg).await.unwrap();
        let y = *t
            .registry()
            .adapt(XRef::of(&elem))
            .unwrap()
            .downcast::<YResource>()
            .unwrap();

        assert_eq!(y.name().unwrap(), "pod-test");
        assert_eq!(y.id().unwrap(), "id-pod");
        assert!(calls()
            .iter()
            .any(|c| c == "pod create --name pod-test --share=net"));

        let rec = y.peek().await.unwrap();
        assert_eq!(rec["Kind"], "pod");

        t.scrub().await;
        assert!(t.get().await.is_none());
        assert!(calls()
            .iter()
            .any(|c| c == "pod rm --force --ignore pod-test"));
    }

    #[tokio::test]
    async fn generated_names_for_networks() {
        let t = terminal(Some(fake_tool())).walk(&["n"]);
        let elem = t.make(NETWORK, Value::from("")).await;
        // Empty JSON text is not a record.
        assert!(elem.is_err());

        let elem = t.make(NETWORK, Value::from("{}")).await.unwrap();
        let json: Json = serde_json::from_slice(&elem.peek_bytes().await).unwrap();
        let name = json["Name"].as_str().unwrap().to_string();
        assert!(name.starts_with("via-circuit-"));

        elem.scrub().await;
        elem.scrub().await;
        let removals = calls()
            .iter()
            .filter(|c| **c == format!("network rm -f {}", name))
            .count();
        assert_eq!(removals, 1);
    }
}
