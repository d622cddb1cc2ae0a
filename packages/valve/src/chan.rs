//! The `chan` element.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use circuit_anchor::kind::CHAN;
use circuit_anchor::{
    AnchorError, Element, ElementFactory, ElementRef, Terminal, Value, XRef,
};

use crate::valve::{MessageReader, MessageWriter, Stat, Valve, ValveError, MESSAGE_CAP};

/// A valve living in an anchor.
///
/// Once a close or a receive leaves the valve done, the element removes
/// itself from its anchor.
pub struct Chan {
    term: Terminal,
    valve: Valve,
}

impl Chan {
    pub fn new(term: Terminal, valve: Valve) -> Self {
        Chan { term, valve }
    }

    pub async fn send(&self) -> Result<MessageWriter, ValveError> {
        self.valve.send().await
    }

    pub async fn recv(&self) -> Result<MessageReader, ValveError> {
        let result = self.valve.recv().await;
        self.release_if_done().await;
        result
    }

    pub async fn close(&self) -> Result<(), ValveError> {
        let result = self.valve.close();
        self.release_if_done().await;
        result
    }

    async fn release_if_done(&self) {
        if self.valve.is_done() {
            self.term.release(self).await;
        }
    }

    pub fn stat(&self) -> Stat {
        self.valve.stat()
    }

    pub fn cap(&self) -> usize {
        self.valve.cap()
    }

    pub fn is_done(&self) -> bool {
        self.valve.is_done()
    }
}

#[async_trait]
impl Element for Chan {
    fn kind(&self) -> &str {
        CHAN
    }

    async fn scrub(&self) {
        self.valve.scrub();
    }

    async fn peek_bytes(&self) -> Vec<u8> {
        self.valve.peek_bytes()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Builds `chan` elements. The argument is the capacity.
pub struct ChanFactory {
    buffer: usize,
}

impl ChanFactory {
    pub fn new(buffer: usize) -> Self {
        ChanFactory { buffer }
    }
}

impl Default for ChanFactory {
    fn default() -> Self {
        Self::new(MESSAGE_CAP)
    }
}

#[async_trait]
impl ElementFactory for ChanFactory {
    async fn make(&self, term: &Terminal, arg: Value) -> circuit_anchor::Result<ElementRef> {
        let cap = match arg {
            Value::Integer(n) => usize::try_from(n).map_err(|_| {
                AnchorError::invalid_argument(CHAN, format!("capacity {} out of range", n))
            })?,
            other => {
                return Err(AnchorError::invalid_argument(
                    CHAN,
                    format!("expecting integer capacity, got {}", other.type_name()),
                ))
            }
        };
        Ok(Arc::new(Chan::new(
            term.clone(),
            Valve::with_buffer(cap, self.buffer),
        )))
    }
}

/// Client handle for `chan` elements.
#[derive(Clone, Debug)]
pub struct YValve {
    x: XRef,
}

impl From<XRef> for YValve {
    fn from(x: XRef) -> Self {
        YValve { x }
    }
}

impl YValve {
    fn chan(&self) -> circuit_anchor::Result<Arc<Chan>> {
        self.x.resolve::<Chan>()
    }

    pub async fn send(&self) -> circuit_anchor::Result<MessageWriter> {
        self.chan()?.send().await.map_err(AnchorError::element)
    }

    pub async fn recv(&self) -> circuit_anchor::Result<MessageReader> {
        self.chan()?.recv().await.map_err(AnchorError::element)
    }

    pub async fn close(&self) -> circuit_anchor::Result<()> {
        self.chan()?.close().await.map_err(AnchorError::element)
    }

    pub async fn scrub(&self) -> circuit_anchor::Result<()> {
        self.chan()?.scrub().await;
        Ok(())
    }

    pub fn stat(&self) -> circuit_anchor::Result<Stat> {
        Ok(self.chan()?.stat())
    }

    pub fn cap(&self) -> circuit_anchor::Result<usize> {
        Ok(self.chan()?.cap())
    }

    pub fn is_done(&self) -> circuit_anchor::Result<bool> {
        Ok(self.chan()?.is_done())
    }
}
