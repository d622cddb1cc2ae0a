//! The `docker` and `container` elements.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use circuit_anchor::{AnchorError, Element, ElementFactory, ElementRef, Terminal, Value, XRef};
use circuit_proc::{Phase, Proc, STD_BUFFER};
use serde_json::Value as Json;
use tokio::io::DuplexStream;
use tracing::{debug, info, warn};

use crate::error::{ContainerError, Result};
use crate::run::{decode_arg, Run};
use crate::tool::{element_name, parse_json_array_first, Tool};

/// A container run in the foreground by the runtime's client process.
///
/// Stdio and signals go to the client process, which the runtime relays to
/// the container. Scrubbing force-removes the container; dropping an
/// element that was never scrubbed attempts the same removal.
pub struct Container {
    kind: &'static str,
    tool: Tool,
    name: String,
    proc: Proc,
    removed: AtomicBool,
}

impl Container {
    pub fn start(kind: &'static str, tool: Tool, run: &Run, buffer: usize) -> Result<Container> {
        let name = element_name(run.name.as_deref());
        let proc = Proc::spawn(tool.cmd(run.args(&name)), buffer);
        let stat = proc.peek();
        if stat.phase == Phase::NotStarted {
            return Err(ContainerError::NotStarted(stat.exit.unwrap_or_default()));
        }
        info!(tool = tool.name(), %name, image = %run.image, "container started");
        Ok(Container {
            kind,
            tool,
            name,
            proc,
            removed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the container exits, then report its inspect record.
    pub async fn wait(&self) -> Result<Json> {
        self.proc.wait().await?;
        self.inspect().await
    }

    pub async fn signal(&self, name: &str) -> Result<()> {
        Ok(self.proc.signal(name).await?)
    }

    pub fn take_stdin(&self) -> Option<DuplexStream> {
        self.proc.take_stdin()
    }

    pub fn take_stdout(&self) -> Option<DuplexStream> {
        self.proc.take_stdout()
    }

    pub fn take_stderr(&self) -> Option<DuplexStream> {
        self.proc.take_stderr()
    }

    pub async fn inspect(&self) -> Result<Json> {
        let out = self
            .tool
            .output(&["container".into(), "inspect".into(), self.name.clone()])
            .await?;
        parse_json_array_first(&out)
    }

    pub fn is_done(&self) -> bool {
        self.proc.has_exited()
    }

    fn rm_args(&self) -> Vec<String> {
        vec!["container".into(), "rm".into(), "-f".into(), self.name.clone()]
    }

    pub async fn remove(&self) {
        if !self.removed.swap(true, Ordering::SeqCst) {
            info!(tool = self.tool.name(), name = %self.name, "removing container");
            if let Err(err) = self.tool.run(&self.rm_args()).await {
                warn!(name = %self.name, %err, "container removal failed");
            }
        }
        self.proc.scrub();
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if !self.removed.load(Ordering::SeqCst) {
            debug!(name = %self.name, "container dropped without scrub");
            self.tool.run_detached(self.rm_args());
        }
    }
}

#[async_trait]
impl Element for Container {
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

/// Makes `docker` or `container` elements with a resolved tool.
pub struct ContainerFactory {
    kind: &'static str,
    tool: Option<Tool>,
    buffer: usize,
}

impl ContainerFactory {
    pub fn new(kind: &'static str, tool: Option<Tool>) -> Self {
        ContainerFactory {
            kind,
            tool,
            buffer: STD_BUFFER,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer;
        self
    }
}

#[async_trait]
impl ElementFactory for ContainerFactory {
    async fn make(&self, term: &Terminal, arg: Value) -> circuit_anchor::Result<ElementRef> {
        let tool = self
            .tool
            .clone()
            .ok_or_else(|| ContainerError::ToolUnavailable(self.kind.to_string()))?;
        let run: Run = decode_arg(self.kind, &arg)?;
        if run.image.trim().is_empty() {
            return Err(AnchorError::invalid_argument(self.kind, "image is required"));
        }

        let elem = Arc::new(Container::start(self.kind, tool, &run, self.buffer)?);
        if run.scrub {
            let term = term.clone();
            let watched = Arc::clone(&elem);
            tokio::spawn(async move {
                if watched.proc.wait().await.is_ok() {
                    debug!(anchor = %term.path(), "container exited, removing element");
                    term.release(&*watched).await;
                }
            });
        }
        Ok(elem)
    }
}

/// Client handle for `docker` and `container` elements.
#[derive(Clone, Debug)]
pub struct YContainer {
    x: XRef,
}

impl From<XRef> for YContainer {
    fn from(x: XRef) -> Self {
        YContainer { x }
    }
}

impl YContainer {
    fn elem(&self) -> circuit_anchor::Result<Arc<Container>> {
        self.x.resolve::<Container>()
    }

    pub async fn wait(&self) -> circuit_anchor::Result<Json> {
        Ok(self.elem()?.wait().await?)
    }

    pub async fn signal(&self, name: &str) -> circuit_anchor::Result<()> {
        Ok(self.elem()?.signal(name).await?)
    }

    pub async fn peek(&self) -> circuit_anchor::Result<Json> {
        Ok(self.elem()?.inspect().await?)
    }

    pub fn stdin(&self) -> circuit_anchor::Result<Option<DuplexStream>> {
        Ok(self.elem()?.take_stdin())
    }

    pub fn stdout(&self) -> circuit_anchor::Result<Option<DuplexStream>> {
        Ok(self.elem()?.take_stdout())
    }

    pub fn stderr(&self) -> circuit_anchor::Result<Option<DuplexStream>> {
        Ok(self.elem()?.take_stderr())
    }

    pub fn is_done(&self) -> circuit_anchor::Result<bool> {
        Ok(self.elem()?.is_done())
    }

    pub async fn scrub(&self) -> circuit_anchor::Result<()> {
        self.elem()?.remove().await;
        Ok(())
    }
}
