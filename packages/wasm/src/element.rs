//! The `wasm` element.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use circuit_anchor::kind::WASM;
use circuit_anchor::{AnchorError, Element, ElementFactory, ElementRef, Terminal, Value, XRef};
use tracing::debug;

use crate::execute::{Execute, WasmStat};
use crate::runner::WasmRun;

pub struct WasmElement {
    run: WasmRun,
}

impl WasmElement {
    pub fn run(&self) -> &WasmRun {
        &self.run
    }
}

#[async_trait]
impl Element for WasmElement {
    fn kind(&self) -> &str {
        WASM
    }

    async fn scrub(&self) {
        self.run.scrub();
    }

    async fn peek_bytes(&self) -> Vec<u8> {
        self.run.peek_bytes()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Makes `wasm` elements from an `Execute` record given as a map or as
/// JSON text.
#[derive(Default)]
pub struct WasmFactory;

#[async_trait]
impl ElementFactory for WasmFactory {
    async fn make(&self, term: &Terminal, arg: Value) -> circuit_anchor::Result<ElementRef> {
        let exec = match &arg {
            Value::String(src) => serde_json::from_str::<Execute>(src),
            other => other.decode::<Execute>(),
        }
        .map_err(|err| {
            AnchorError::invalid_argument(WASM, format!("expecting an execute record: {}", err))
        })?;

        let scrub = exec.scrub;
        let elem = Arc::new(WasmElement {
            run: WasmRun::start(exec).await?,
        });
        if scrub {
            let term = term.clone();
            let watched = Arc::clone(&elem);
            tokio::spawn(async move {
                if watched.run.wait().await.is_ok() {
                    debug!(anchor = %term.path(), "wasm call finished, removing element");
                    term.release(&*watched).await;
                }
            });
        }
        Ok(elem)
    }
}

/// Client handle for `wasm` elements.
#[derive(Clone, Debug)]
pub struct YWasm {
    x: XRef,
}

impl From<XRef> for YWasm {
    fn from(x: XRef) -> Self {
        YWasm { x }
    }
}

impl YWasm {
    fn elem(&self) -> circuit_anchor::Result<Arc<WasmElement>> {
        self.x.resolve::<WasmElement>()
    }

    pub async fn wait(&self) -> circuit_anchor::Result<WasmStat> {
        Ok(self.elem()?.run.wait().await?)
    }

    pub fn peek(&self) -> circuit_anchor::Result<WasmStat> {
        Ok(self.elem()?.run.peek())
    }

    pub fn signal(&self, name: &str) -> circuit_anchor::Result<()> {
        Ok(self.elem()?.run.signal(name)?)
    }

    pub fn is_done(&self) -> circuit_anchor::Result<bool> {
        Ok(self.elem()?.run.is_done())
    }

    pub fn scrub(&self) -> circuit_anchor::Result<()> {
        self.elem()?.run.scrub();
        Ok(())
    }
}
