//! Nameserver elements for circuit anchors.
//!
//! A `dns` element binds a UDP socket and answers A, AAAA, CNAME and TXT
//! queries from a record table edited through `set` and `unset`. Scrubbing
//! the element stops the responder and releases the socket.

pub mod error;
pub mod nameserver;
pub mod record;

pub use error::{DnsError, Result};
pub use nameserver::{DnsFactory, Nameserver, NameserverStat, YNameserver, DEFAULT_BIND};
pub use record::{canonical_name, RData, Record, DEFAULT_TTL};

/// Message types used on the wire, for clients building queries.
pub use hickory_proto as proto;
