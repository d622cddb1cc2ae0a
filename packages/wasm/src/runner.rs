//! Compiling a module and running one exported function on a blocking
//! worker.

use circuit_proc::parse_signal;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use wasmtime::{Config, Engine, ExternType, Linker, Module, Store, Trap, Val};

use crate::error::{Result, WasmError};
use crate::execute::{parse_args, render, Execute, WasmPhase, WasmStat};

/// One call of an exported wasm function.
///
/// Every running call has its own engine, so advancing the engine's epoch
/// interrupts exactly this call.
pub struct WasmRun {
    exec: Execute,
    engine: Engine,
    stat: watch::Receiver<WasmStat>,
    abort: watch::Sender<bool>,
}

impl WasmRun {
    /// Compile `exec.path`, check the function and its arguments, and start
    /// the call. Must be called inside a tokio runtime.
    pub async fn start(exec: Execute) -> Result<WasmRun> {
        let mut config = Config::new();
        config.epoch_interruption(true);
        let engine = Engine::new(&config).map_err(|e| WasmError::Compile {
            path: exec.path.clone(),
            message: e.to_string(),
        })?;

        let compiled = {
            let engine = engine.clone();
            let exec = exec.clone();
            tokio::task::spawn_blocking(move || prepare(&engine, &exec))
                .await
                .map_err(|e| WasmError::Worker(e.to_string()))?
        };
        let (module, params) = compiled?;

        let (stat_tx, stat) = watch::channel(WasmStat::running());
        let (abort, _) = watch::channel(false);
        info!(path = %exec.path, function = %exec.function, "wasm call started");

        // The deadline is fixed before any signal can advance the epoch.
        let mut store = Store::new(&engine, ());
        store.set_epoch_deadline(1);
        store.epoch_deadline_trap();

        let worker_exec = exec.clone();
        tokio::task::spawn_blocking(move || {
            let done = call(store, &module, &worker_exec, params);
            debug!(function = %worker_exec.function, phase = %done.phase, "wasm call finished");
            stat_tx.send_replace(done);
        });

        Ok(WasmRun {
            exec,
            engine,
            stat,
            abort,
        })
    }

    pub fn execute(&self) -> &Execute {
        &self.exec
    }

    /// Block until the call finishes, or fail with `Aborted` on scrub.
    /// A worker that ends without reporting a result is a `Worker` error.
    pub async fn wait(&self) -> Result<WasmStat> {
        let mut stat = self.stat.clone();
        let mut abort = self.abort.subscribe();
        let finished = async {
            stat.wait_for(|s| s.phase.is_terminal())
                .await
                .map(|_| ())
        };
        let aborted = async {
            let _ = abort.wait_for(|aborted| *aborted).await;
        };
        tokio::select! {
            biased;
            result = finished => match result {
                Ok(()) => Ok(self.peek()),
                Err(_) => {
                    warn!(function = %self.exec.function, "wasm worker ended without a result");
                    Err(WasmError::Worker("call ended without a result".to_string()))
                }
            },
            () = aborted => Err(WasmError::Aborted),
        }
    }

    pub fn peek(&self) -> WasmStat {
        self.stat.borrow().clone()
    }

    pub fn peek_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.peek()).unwrap_or_default()
    }

    /// `KILL`, `TERM` and `INT` interrupt the running call.
    pub fn signal(&self, name: &str) -> Result<()> {
        parse_signal(name).ok_or(WasmError::SignalNotRecognized)?;
        let bare = name.trim().to_ascii_uppercase();
        let bare = bare.strip_prefix("SIG").unwrap_or(&bare);
        if !matches!(bare, "KILL" | "TERM" | "INT") {
            return Err(WasmError::SignalNotSupported(bare.to_string()));
        }
        if self.is_finished() {
            return Err(WasmError::NotRunning);
        }
        debug!(function = %self.exec.function, signal = bare, "interrupting wasm call");
        self.engine.increment_epoch();
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.stat.borrow().phase.is_terminal()
    }

    /// Detach waiters and interrupt the call. Idempotent.
    pub fn scrub(&self) {
        if !self.abort.send_replace(true) {
            debug!(function = %self.exec.function, "wasm element scrubbed");
            self.engine.increment_epoch();
        }
    }

    pub fn is_scrubbed(&self) -> bool {
        *self.abort.borrow()
    }

    /// Scrubbed, or finished with auto-removal requested.
    pub fn is_done(&self) -> bool {
        self.is_scrubbed() || (self.is_finished() && self.exec.scrub)
    }
}

fn prepare(engine: &Engine, exec: &Execute) -> Result<(Module, Vec<Val>)> {
    let module = Module::from_file(engine, &exec.path).map_err(|e| WasmError::Compile {
        path: exec.path.clone(),
        message: e.to_string(),
    })?;
    let ty = match module.get_export(&exec.function) {
        Some(ExternType::Func(ty)) => ty,
        _ => return Err(WasmError::NoSuchFunction(exec.function.clone())),
    };
    let params = parse_args(&exec.function, ty.params(), &exec.args)?;
    Ok((module, params))
}

fn call(mut store: Store<()>, module: &Module, exec: &Execute, params: Vec<Val>) -> WasmStat {
    let failed = |phase: WasmPhase, error: String| WasmStat {
        phase,
        results: Vec::new(),
        error: Some(error),
    };

    let linker = Linker::new(store.engine());
    let instance = match linker.instantiate(&mut store, module) {
        Ok(i) => i,
        Err(err) => {
            warn!(path = %exec.path, %err, "wasm instantiation failed");
            return failed(WasmPhase::Failed, err.to_string());
        }
    };
    let Some(func) = instance.get_func(&mut store, &exec.function) else {
        return failed(WasmPhase::Failed, format!("no function {}", exec.function));
    };

    let mut results = vec![Val::I32(0); func.ty(&store).results().len()];
    match func.call(&mut store, &params, &mut results) {
        Ok(()) => WasmStat {
            phase: WasmPhase::Completed,
            results: results.iter().map(render).collect(),
            error: None,
        },
        Err(err) if matches!(err.downcast_ref::<Trap>(), Some(Trap::Interrupt)) => {
            failed(WasmPhase::Interrupted, "interrupted".to_string())
        }
        Err(err) => failed(WasmPhase::Failed, format!("{:#}", err)),
    }
}
