//! Cluster membership events feeding `@join` and `@leave` subscriptions.

use std::sync::Arc;

use circuit_anchor::kind::{ON_JOIN, ON_LEAVE};
use circuit_anchor::{Genus, Publisher, Subscription, Value};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Payload of join and leave events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEvent {
    pub id: String,
    pub addr: String,
}

impl MemberEvent {
    pub fn from_value(value: &Value) -> Option<MemberEvent> {
        value.decode().ok()
    }
}

pub struct Membership {
    arrivals: Publisher,
    departures: Publisher,
}

impl Membership {
    pub fn new() -> Self {
        Membership {
            arrivals: Publisher::new("join", ON_JOIN),
            departures: Publisher::new("leave", ON_LEAVE),
        }
    }

    /// Returns how many subscribers received the event.
    pub fn announce_join(&self, event: &MemberEvent) -> usize {
        let delivered = self.arrivals.publish(encode(event));
        debug!(id = %event.id, addr = %event.addr, delivered, "member joined");
        delivered
    }

    pub fn announce_leave(&self, event: &MemberEvent) -> usize {
        let delivered = self.departures.publish(encode(event));
        debug!(id = %event.id, addr = %event.addr, delivered, "member left");
        delivered
    }

    /// End every subscription. Events already delivered stay consumable.
    pub fn close(&self) {
        self.arrivals.close();
        self.departures.close();
    }
}

impl Default for Membership {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(event: &MemberEvent) -> Value {
    Value::encode(event).unwrap_or_else(|err| {
        warn!(id = %event.id, %err, "member event not encodable");
        Value::Null
    })
}

impl Genus for Membership {
    fn new_arrivals(&self) -> Arc<Subscription> {
        self.arrivals.subscribe()
    }

    fn new_departures(&self) -> Arc<Subscription> {
        self.departures.subscribe()
    }
}
