//! The `proc` element.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use circuit_anchor::kind::PROC;
use circuit_anchor::{AnchorError, Element, ElementFactory, ElementRef, Terminal, Value, XRef};
use tokio::io::DuplexStream;
use tracing::debug;

use crate::cmd::{Cmd, ProcStat};
use crate::proc::{Proc, ProcError, STD_BUFFER};

/// Read a command from an element argument: either a map with the
/// command's fields or the same thing as JSON text.
pub fn cmd_from_value(kind: &str, arg: &Value) -> circuit_anchor::Result<Cmd> {
    let parsed = match arg {
        Value::String(src) => Cmd::parse(src),
        other => other.decode::<Cmd>(),
    };
    parsed.map_err(|err| {
        AnchorError::invalid_argument(kind, format!("expecting a command record: {}", err))
    })
}

pub struct ProcElement {
    proc: Proc,
}

impl ProcElement {
    pub fn proc(&self) -> &Proc {
        &self.proc
    }
}

#[async_trait]
impl Element for ProcElement {
    fn kind(&self) -> &str {
        PROC
    }

    async fn scrub(&self) {
        self.proc.scrub();
    }

    async fn peek_bytes(&self) -> Vec<u8> {
        self.proc.peek_bytes()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

pub struct ProcFactory {
    buffer: usize,
}

impl ProcFactory {
    pub fn new(buffer: usize) -> Self {
        ProcFactory { buffer }
    }
}

impl Default for ProcFactory {
    fn default() -> Self {
        Self::new(STD_BUFFER)
    }
}

#[async_trait]
impl ElementFactory for ProcFactory {
    async fn make(&self, term: &Terminal, arg: Value) -> circuit_anchor::Result<ElementRef> {
        let cmd = cmd_from_value(PROC, &arg)?;
        let scrub = cmd.scrub;
        let elem = Arc::new(ProcElement {
            proc: Proc::spawn(cmd, self.buffer),
        });
        if scrub {
            let term = term.clone();
            let watched = Arc::clone(&elem);
            tokio::spawn(async move {
                if watched.proc.wait().await.is_ok() {
                    debug!(anchor = %term.path(), "process exited, removing element");
                    term.release(&*watched).await;
                }
            });
        }
        Ok(elem)
    }
}

/// Client handle for `proc` elements.
#[derive(Clone, Debug)]
pub struct YProc {
    x: XRef,
}

impl From<XRef> for YProc {
    fn from(x: XRef) -> Self {
        YProc { x }
    }
}

impl YProc {
    fn elem(&self) -> circuit_anchor::Result<Arc<ProcElement>> {
        self.x.resolve::<ProcElement>()
    }

    pub async fn wait(&self) -> circuit_anchor::Result<ProcStat> {
        self.elem()?
            .proc
            .wait()
            .await
            .map_err(AnchorError::element)
    }

    pub async fn signal(&self, name: &str) -> circuit_anchor::Result<()> {
        self.elem()?
            .proc
            .signal(name)
            .await
            .map_err(AnchorError::element)
    }

    pub fn peek(&self) -> circuit_anchor::Result<ProcStat> {
        Ok(self.elem()?.proc.peek())
    }

    pub fn stdin(&self) -> circuit_anchor::Result<Option<DuplexStream>> {
        Ok(self.elem()?.proc.take_stdin())
    }

    pub fn stdout(&self) -> circuit_anchor::Result<Option<DuplexStream>> {
        Ok(self.elem()?.proc.take_stdout())
    }

    pub fn stderr(&self) -> circuit_anchor::Result<Option<DuplexStream>> {
        Ok(self.elem()?.proc.take_stderr())
    }

    pub fn get_cmd(&self) -> circuit_anchor::Result<Cmd> {
        Ok(self.elem()?.proc.get_cmd())
    }

    pub fn get_env(&self) -> circuit_anchor::Result<Vec<String>> {
        Ok(self.elem()?.proc.get_env())
    }

    pub fn is_done(&self) -> circuit_anchor::Result<bool> {
        Ok(self.elem()?.proc.is_done())
    }

    pub async fn scrub(&self) -> circuit_anchor::Result<()> {
        self.elem()?.proc.scrub();
        Ok(())
    }
}

impl From<ProcError> for AnchorError {
    fn from(err: ProcError) -> Self {
        AnchorError::element(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::Phase;
    use circuit_anchor::{adapter_for, AnchorNode, ElementRegistry, Genus, Publisher, Subscription};
    use std::time::Duration;

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

    fn terminal() -> Terminal {
        let registry = ElementRegistry::with_builtins();
        registry.register(PROC, ProcFactory::default(), adapter_for::<YProc>());
        Terminal::new(
            AnchorNode::root("circuit"),
            Arc::new(Alone {
                join: Publisher::new("join", "@join"),
                leave: Publisher::new("leave", "@leave"),
            }),
            Arc::new(registry),
        )
    }

    fn handle(elem: &ElementRef, t: &Terminal) -> YProc {
        *t.registry()
            .adapt(XRef::of(elem))
            .unwrap()
            .downcast::<YProc>()
            .unwrap()
    }

    #[tokio::test]
    async fn bad_argument_is_rejected() {
        let t = terminal().walk(&["p"]);
        let err = t.make(PROC, Value::from(5i64)).await.unwrap_err();
        assert!(matches!(err, AnchorError::InvalidArgument { .. }));
        assert!(t.get().await.is_none());
    }

    #[tokio::test]
    async fn accepts_json_text() {
        let t = terminal().walk(&["p"]);
        let elem = t
            .make(PROC, Value::from(r#"{"path": "/bin/true"}"#))
            .await
            .unwrap();
        let stat = handle(&elem, &t).wait().await.unwrap();
        assert_eq!(stat.phase, Phase::Exited);
    }

    #[tokio::test]
    async fn missing_binary_still_occupies_anchor() {
        let t = terminal().walk(&["p"]);
        let elem = t
            .make(PROC, Value::encode(&Cmd::new("/no/such/binary")).unwrap())
            .await
            .unwrap();
        let y = handle(&elem, &t);
        let stat = y.wait().await.unwrap();
        assert_eq!(stat.phase, Phase::NotStarted);
        assert!(stat.exit.is_some());
        assert!(t.get().await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn auto_scrub_frees_anchor_after_exit() {
        let t = terminal().walk(&["p"]);
        let cmd = Cmd::new("/bin/true").with_scrub(true);
        t.make(PROC, Value::encode(&cmd).unwrap()).await.unwrap();

        for _ in 0..100 {
            if t.get().await.is_none() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("anchor still occupied after process exit");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn anchor_scrub_aborts_wait() {
        let t = terminal().walk(&["p"]);
        let elem = t
            .make(
                PROC,
                Value::encode(&Cmd::new("/bin/sleep").arg("30")).unwrap(),
            )
            .await
            .unwrap();
        let y = handle(&elem, &t);
        let waiter = tokio::spawn({
            let y = y.clone();
            async move { y.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        t.scrub().await;

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_element::<ProcError>(),
            Some(ProcError::Aborted)
        ));
        y.signal("KILL").await.unwrap();
    }

    #[tokio::test]
    async fn signal_errors_cross_as_element_errors() {
        let t = terminal().walk(&["p"]);
        let elem = t
            .make(PROC, Value::encode(&Cmd::new("/bin/sleep").arg("30")).unwrap())
            .await
            .unwrap();
        let y = handle(&elem, &t);
        let err = y.signal("BOGUS").await.unwrap_err();
        assert_eq!(err.to_string(), "signal name not recognized");
        y.signal("KILL").await.unwrap();
        assert_eq!(y.wait().await.unwrap().phase, Phase::Signaled);
    }
}
