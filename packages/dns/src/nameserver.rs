//! The `dns` element: a record table answered over UDP.

use std::any::Any;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use circuit_anchor::kind::NAMESERVER;
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use circuit_anchor::{AnchorError, Element, ElementFactory, ElementRef, Terminal, Value, XRef};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{DnsError, Result};
use crate::record::{canonical_name, Record};

pub const DEFAULT_BIND: &str = "127.0.0.1:0";

const RECV_BUFFER: usize = 4096;

/// Largest reply sent without the truncation bit.
const UDP_PAYLOAD: usize = 512;

type Table = Arc<Mutex<BTreeMap<String, Vec<Record>>>>;

fn lock(table: &Table) -> MutexGuard<'_, BTreeMap<String, Vec<Record>>> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameserverStat {
    pub address: String,
    pub records: BTreeMap<String, Vec<String>>,
}

pub struct Nameserver {
    addr: SocketAddr,
    table: Table,
    shutdown: watch::Sender<bool>,
}

impl Nameserver {
    /// Bind `bind` and start answering queries from an empty table.
    pub async fn start(bind: &str) -> Result<Nameserver> {
        let socket = UdpSocket::bind(bind).await?;
        let addr = socket.local_addr()?;
        let table: Table = Arc::default();
        let (shutdown, stop) = watch::channel(false);

        tokio::spawn(serve(socket, Arc::clone(&table), stop));
        info!(%addr, "nameserver listening");

        Ok(Nameserver {
            addr,
            table,
            shutdown,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Parse and add a record under its owner name.
    pub fn set(&self, rr: &str) -> Result<Record> {
        if self.is_scrubbed() {
            return Err(DnsError::Scrubbed);
        }
        let record = Record::parse(rr)?;
        debug!(addr = %self.addr, record = %record, "record set");
        lock(&self.table)
            .entry(record.name.clone())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    /// Remove every record owned by `name`. Returns whether any existed.
    pub fn unset(&self, name: &str) -> bool {
        let removed = lock(&self.table).remove(&canonical_name(name)).is_some();
        debug!(addr = %self.addr, name, removed, "records unset");
        removed
    }

    pub fn records(&self, name: &str) -> Vec<Record> {
        lock(&self.table)
            .get(&canonical_name(name))
            .cloned()
            .unwrap_or_default()
    }

    pub fn peek(&self) -> NameserverStat {
        let records = lock(&self.table)
            .iter()
            .map(|(name, rrs)| {
                let rendered = rrs.iter().map(Record::to_string).collect::<Vec<_>>();
                (name.clone(), rendered)
            })
            .collect();
        NameserverStat {
            address: self.addr.to_string(),
            records,
        }
    }

    pub fn peek_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.peek()).unwrap_or_default()
    }

    /// Stop answering. Idempotent.
    pub fn scrub(&self) {
        if !self.shutdown.send_replace(true) {
            info!(addr = %self.addr, "nameserver stopped");
        }
    }

    pub fn is_scrubbed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

async fn serve(socket: UdpSocket, table: Table, mut stop: watch::Receiver<bool>) {
    let mut buf = vec![0u8; RECV_BUFFER];
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = match received {
                    Ok(r) => r,
                    Err(err) => {
                        warn!(%err, "nameserver receive failed");
                        continue;
                    }
                };
                let Some(reply) = answer(&table, &buf[..len]) else {
                    continue;
                };
                if let Err(err) = socket.send_to(&reply, peer).await {
                    warn!(%peer, %err, "nameserver reply failed");
                }
            }
        }
    }
}

/// Build the reply for one datagram. Undecodable packets and stray
/// responses get no reply.
fn answer(table: &Table, packet: &[u8]) -> Option<Vec<u8>> {
    let query = match Message::from_vec(packet) {
        Ok(q) if q.message_type() == MessageType::Query => q,
        Ok(_) => return None,
        Err(err) => {
            debug!(%err, "dropping undecodable query");
            return None;
        }
    };

    let mut reply = Message::new();
    reply
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_authoritative(true)
        .set_recursion_desired(query.recursion_desired());
    reply.add_queries(query.queries().iter().cloned());

    match (query.op_code(), query.queries()) {
        (OpCode::Query, [question]) => {
            let name = canonical_name(&question.name().to_ascii());
            match lock(table).get(&name) {
                None => {
                    reply.set_response_code(ResponseCode::NXDomain);
                }
                Some(rrs) => {
                    reply.add_answers(
                        rrs.iter()
                            .filter(|rr| rr.answers(question.query_type()))
                            .filter_map(|rr| rr.to_record().ok()),
                    );
                }
            }
        }
        (OpCode::Query, _) => {
            reply.set_response_code(ResponseCode::FormErr);
        }
        _ => {
            reply.set_response_code(ResponseCode::NotImp);
        }
    }

    encode_udp(reply)
}

/// Encode a reply for UDP, dropping the answers and setting TC when it
/// does not fit.
fn encode_udp(mut reply: Message) -> Option<Vec<u8>> {
    let bytes = match reply.to_vec() {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(%err, "reply encoding failed");
            return None;
        }
    };
    if bytes.len() <= UDP_PAYLOAD {
        return Some(bytes);
    }
    reply.take_answers();
    reply.set_truncated(true);
    reply.to_vec().ok()
}

#[async_trait]
impl Element for Nameserver {
    fn kind(&self) -> &str {
        NAMESERVER
    }

    async fn scrub(&self) {
        Nameserver::scrub(self);
    }

    async fn peek_bytes(&self) -> Vec<u8> {
        Nameserver::peek_bytes(self)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl From<DnsError> for AnchorError {
    fn from(err: DnsError) -> Self {
        AnchorError::element(err)
    }
}

/// Makes `dns` elements. The argument is the address to bind; an empty
/// string or no argument uses the factory's default.
pub struct DnsFactory {
    default_bind: String,
}

impl DnsFactory {
    pub fn new(default_bind: impl Into<String>) -> Self {
        DnsFactory {
            default_bind: default_bind.into(),
        }
    }
}

impl Default for DnsFactory {
    fn default() -> Self {
        Self::new(DEFAULT_BIND)
    }
}

#[async_trait]
impl ElementFactory for DnsFactory {
    async fn make(&self, term: &Terminal, arg: Value) -> circuit_anchor::Result<ElementRef> {
        let bind = match &arg {
            Value::Null => self.default_bind.as_str(),
            Value::String(s) if s.trim().is_empty() => self.default_bind.as_str(),
            Value::String(s) => s.trim(),
            other => {
                return Err(AnchorError::invalid_argument(
                    NAMESERVER,
                    format!("expecting a bind address string, got {}", other.type_name()),
                ))
            }
        };
        let ns = Nameserver::start(bind).await?;
        debug!(anchor = %term.path(), addr = %ns.addr(), "dns element made");
        Ok(Arc::new(ns))
    }
}

/// Client handle for `dns` elements.
#[derive(Clone, Debug)]
pub struct YNameserver {
    x: XRef,
}

impl From<XRef> for YNameserver {
    fn from(x: XRef) -> Self {
        YNameserver { x }
    }
}

impl YNameserver {
    fn ns(&self) -> circuit_anchor::Result<Arc<Nameserver>> {
        self.x.resolve::<Nameserver>()
    }

    pub fn set(&self, rr: &str) -> circuit_anchor::Result<()> {
        self.ns()?.set(rr)?;
        Ok(())
    }

    pub fn unset(&self, name: &str) -> circuit_anchor::Result<()> {
        self.ns()?.unset(name);
        Ok(())
    }

    pub fn peek(&self) -> circuit_anchor::Result<NameserverStat> {
        Ok(self.ns()?.peek())
    }

    pub fn peek_bytes(&self) -> circuit_anchor::Result<Vec<u8>> {
        Ok(self.ns()?.peek_bytes())
    }

    pub fn scrub(&self) -> circuit_anchor::Result<()> {
        self.ns()?.scrub();
        Ok(())
    }
}
