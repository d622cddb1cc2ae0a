//! A circuit server node.
//!
//! [`Circuit`] ties the anchor namespace to the element kinds this
//! workspace provides: it loads a [`CircuitConfig`], resolves container
//! tools, registers every kind, attaches this server's `server` element
//! under `/<server-id>` and relays membership changes to `@join`/`@leave`
//! subscribers.
//!
//! ```rust,no_run
//! use circuit::{Circuit, CircuitConfig};
//! use circuit_anchor::Value;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let circuit = Circuit::start(CircuitConfig::default()).await?;
//! let chan = circuit.terminal().walk(&["jobs", "queue"]);
//! chan.make("chan", Value::from(8i64)).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod kinds;
pub mod membership;

use std::collections::BTreeMap;
use std::sync::Arc;

use circuit_anchor::kind::SERVER;
use circuit_anchor::{AnchorNode, ServerElement, ServerStat, Terminal, YTerminal};
use tokio::sync::Mutex;
use tracing::info;

pub use config::{CircuitConfig, ConfigError, Result, Tools};
pub use kinds::{registry, KINDS};
pub use membership::{MemberEvent, Membership};

/// A fresh server identifier: `X` followed by 16 hex digits.
pub fn new_server_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("X{}", hex[..16].to_ascii_uppercase())
}

pub struct Circuit {
    id: String,
    config: CircuitConfig,
    tools: Tools,
    membership: Arc<Membership>,
    root: Terminal,
    server: Arc<ServerElement>,
    members: Mutex<()>,
}

impl Circuit {
    /// Build the namespace for a new server and attach its `server`
    /// element.
    pub async fn start(config: CircuitConfig) -> Result<Circuit> {
        config.validate()?;
        let tools = config.resolve_tools().await;
        let registry = Arc::new(kinds::registry(&config, &tools));
        let membership = Arc::new(Membership::new());
        let root = Terminal::new(
            AnchorNode::root(&config.name),
            Arc::clone(&membership) as Arc<dyn circuit_anchor::Genus>,
            registry,
        );

        let id = new_server_id();
        let server = Arc::new(ServerElement::new(&id, &config.addr));
        root.walk(&[&id]).attach(SERVER, server.clone()).await;
        info!(%id, addr = %config.addr, root = %config.name, "circuit server started");

        Ok(Circuit {
            id,
            config,
            tools,
            membership,
            root,
            server,
            members: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }

    pub fn server(&self) -> &Arc<ServerElement> {
        &self.server
    }

    /// The root anchor.
    pub fn terminal(&self) -> Terminal {
        self.root.clone()
    }

    /// A remotely-callable view of the root anchor.
    pub fn x(&self) -> YTerminal {
        YTerminal::new(self.root.x())
    }

    /// Record a peer joining: attach its `server` element under `/<id>` and
    /// notify `@join` subscribers. Returns false if `/<id>` is occupied.
    pub async fn join(&self, id: &str, addr: &str) -> bool {
        let _members = self.members.lock().await;
        let anchor = self.root.walk(&[id]);
        if !anchor
            .try_attach(SERVER, Arc::new(ServerElement::new(id, addr)))
            .await
        {
            return false;
        }
        self.membership.announce_join(&MemberEvent {
            id: id.to_string(),
            addr: addr.to_string(),
        });
        true
    }

    /// Record a peer leaving: detach its `server` element and notify
    /// `@leave` subscribers. This server cannot leave itself.
    pub async fn leave(&self, id: &str) -> bool {
        if id == self.id {
            return false;
        }
        let _members = self.members.lock().await;
        let anchor = self.root.walk(&[id]);
        let Some(addr) = server_stat(&anchor).await.map(|s| s.addr) else {
            return false;
        };
        if !anchor.detach().await {
            return false;
        }
        self.membership.announce_leave(&MemberEvent {
            id: id.to_string(),
            addr,
        });
        true
    }

    /// Every server currently attached at the top level, by id.
    pub async fn members(&self) -> BTreeMap<String, ServerStat> {
        let mut out = BTreeMap::new();
        for (name, anchor) in self.root.view() {
            if let Some(stat) = server_stat(&anchor).await {
                out.insert(name, stat);
            }
        }
        out
    }

    /// End all membership subscriptions.
    pub fn shutdown(&self) {
        info!(id = %self.id, "circuit server shutting down");
        self.membership.close();
    }
}

async fn server_stat(anchor: &Terminal) -> Option<ServerStat> {
    let (kind, elem) = anchor.get().await?;
    if kind != SERVER {
        return None;
    }
    elem.as_any()
        .downcast::<ServerElement>()
        .ok()
        .map(|s| s.peek())
}

#[cfg(test)]
mod tests {
    use super::*;
    use circuit_anchor::kind::ON_JOIN;
    use circuit_anchor::Value;

    #[test]
    fn server_ids() {
        let id = new_server_id();
        assert_eq!(id.len(), 17);
        assert!(id.starts_with('X'));
        assert!(id[1..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_server_id());
    }

    #[tokio::test]
    async fn start_attaches_own_server() {
        let circuit = Circuit::start(CircuitConfig::default()).await.unwrap();
        let members = circuit.members().await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[circuit.id()].addr, "127.0.0.1:0");
        assert!(!circuit.leave(circuit.id()).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn join_racing_make_has_one_winner() {
        let circuit = Arc::new(Circuit::start(CircuitConfig::default()).await.unwrap());
        for round in 0..32 {
            let id = format!("XPEER{}", round);
            let join = tokio::spawn({
                let circuit = Arc::clone(&circuit);
                let id = id.clone();
                async move { circuit.join(&id, "10.0.0.1:1").await }
            });
            let make = tokio::spawn({
                let anchor = circuit.terminal().walk(&[id.as_str()]);
                async move { anchor.make(ON_JOIN, Value::Null).await.is_ok() }
            });
            let joined = join.await.unwrap();
            let made = make.await.unwrap();
            assert!(joined != made, "round {}: joined={} made={}", round, joined, made);
        }
    }

    #[tokio::test]
    async fn invalid_config_is_refused() {
        let config = CircuitConfig {
            std_buffer: 0,
            ..CircuitConfig::default()
        };
        assert!(matches!(
            Circuit::start(config).await,
            Err(ConfigError::Invalid(_))
        ));
    }
}
