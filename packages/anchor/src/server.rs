//! The `server` element: identity of one cluster member.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::element::{Element, ElementRef, XRef};
use crate::error::{AnchorError, Result};
use crate::registry::ElementFactory;
use crate::terminal::{Terminal, SERVER};
use crate::value::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerStat {
    pub addr: String,
    pub joined: String,
}

/// Attached by membership logic under `/<id>`; users can neither make nor
/// scrub it.
#[derive(Debug)]
pub struct ServerElement {
    id: String,
    addr: String,
    joined: DateTime<Utc>,
}

impl ServerElement {
    pub fn new(id: &str, addr: &str) -> Self {
        ServerElement {
            id: id.to_string(),
            addr: addr.to_string(),
            joined: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peek(&self) -> ServerStat {
        ServerStat {
            addr: self.addr.clone(),
            joined: self.joined.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

#[async_trait]
impl Element for ServerElement {
    fn kind(&self) -> &str {
        SERVER
    }

    async fn scrub(&self) {}

    async fn peek_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.peek()).unwrap_or_default()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub(crate) struct ServerFactory;

#[async_trait]
impl ElementFactory for ServerFactory {
    async fn make(&self, _term: &Terminal, _arg: Value) -> Result<ElementRef> {
        Err(AnchorError::NotConstructible(SERVER.to_string()))
    }
}

/// Client handle for `server` elements.
#[derive(Clone, Debug)]
pub struct YServer {
    x: XRef,
}

impl From<XRef> for YServer {
    fn from(x: XRef) -> Self {
        YServer { x }
    }
}

impl YServer {
    pub fn peek(&self) -> Result<ServerStat> {
        Ok(self.x.resolve::<ServerElement>()?.peek())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn peek_reports_addr() {
        let server = ServerElement::new("X1", "10.0.0.7:4000");
        let stat = server.peek();
        assert_eq!(stat.addr, "10.0.0.7:4000");
        assert!(stat.joined.ends_with('Z'));

        let decoded: ServerStat = serde_json::from_slice(&server.peek_bytes().await).unwrap();
        assert_eq!(decoded, stat);
    }

    #[test]
    fn client_handle_peeks_through_reference() {
        let elem: ElementRef = Arc::new(ServerElement::new("X1", "host:1"));
        let y = YServer::from(XRef::of(&elem));
        assert_eq!(y.peek().unwrap().addr, "host:1");
        drop(elem);
        assert!(matches!(y.peek(), Err(AnchorError::RemoteUnavailable(_))));
    }
}
