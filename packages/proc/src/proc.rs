//! A running (or failed) operating-system process.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::cmd::{Cmd, Phase, ProcStat};
use crate::signal::{parse_signal, signal_name};

/// Buffer between the process and the stdio streams handed to callers.
pub const STD_BUFFER: usize = 32_000;

#[derive(Debug, Error)]
pub enum ProcError {
    #[error("aborted")]
    Aborted,

    #[error("no running process to signal")]
    NoProcess,

    #[error("signal name not recognized")]
    SignalNotRecognized,

    #[error("signal delivery failed: {0}")]
    Signal(#[source] std::io::Error),

    #[error("process exit status was lost")]
    ExitLost,
}

pub type Result<T> = std::result::Result<T, ProcError>;

/// A signal for the reaper to deliver, with the channel for its outcome.
type SignalRequest = (Signal, oneshot::Sender<Result<()>>);

#[derive(Debug, Clone)]
struct Exit {
    phase: Phase,
    error: Option<String>,
}

impl Exit {
    fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Exit {
                phase: Phase::Exited,
                error: (code != 0).then(|| format!("exit status {}", code)),
            };
        }
        if let Some(signo) = status.signal() {
            let name = signal_name(signo)
                .map(str::to_string)
                .unwrap_or_else(|| signo.to_string());
            return Exit {
                phase: Phase::Signaled,
                error: Some(format!("signal: {}", name)),
            };
        }
        if status.stopped_signal().is_some() {
            return Exit {
                phase: Phase::Stopped,
                error: None,
            };
        }
        Exit {
            phase: Phase::Continued,
            error: None,
        }
    }
}

struct Stdio3 {
    stdin: Option<DuplexStream>,
    stdout: Option<DuplexStream>,
    stderr: Option<DuplexStream>,
}

/// One operating-system process.
///
/// The exit result is written once and broadcast, so every waiter sees the
/// same status. Scrubbing detaches waiters without touching the process.
///
/// The child is owned by a reaper task. Signals are routed through it, so a
/// signal is only sent while the child is still unreaped and its pid cannot
/// have been reused.
pub struct Proc {
    cmd: Cmd,
    pid: Option<u32>,
    signals: Option<mpsc::UnboundedSender<SignalRequest>>,
    exit: watch::Receiver<Option<Exit>>,
    abort: watch::Sender<bool>,
    stdio: Mutex<Stdio3>,
}

impl Proc {
    /// Start `cmd`. A failed spawn is recorded as the exit result.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(mut cmd: Cmd, buffer: usize) -> Self {
        cmd.path = cmd.path.trim().to_string();

        let mut command = Command::new(&cmd.path);
        command
            .args(&cmd.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if !cmd.env.is_empty() {
            command.env_clear();
            command.envs(cmd.env_pairs());
        }
        if !cmd.dir.is_empty() {
            command.current_dir(&cmd.dir);
        }

        let (stdin_user, stdin_pump) = tokio::io::duplex(buffer);
        let (stdout_pump, stdout_user) = tokio::io::duplex(buffer);
        let (stderr_pump, stderr_user) = tokio::io::duplex(buffer);
        let stdio = Mutex::new(Stdio3 {
            stdin: Some(stdin_user),
            stdout: Some(stdout_user),
            stderr: Some(stderr_user),
        });
        let (abort, _) = watch::channel(false);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(path = %cmd.path, error = %err, "process failed to start");
                let (_, exit) = watch::channel(Some(Exit {
                    phase: Phase::NotStarted,
                    error: Some(format!("exec error: {}", err)),
                }));
                return Proc {
                    cmd,
                    pid: None,
                    signals: None,
                    exit,
                    abort,
                    stdio,
                };
            }
        };
        let pid = child.id();
        info!(path = %cmd.path, pid, "process started");

        if let Some(stdin) = child.stdin.take() {
            tokio::spawn(pump(stdin_pump, stdin));
        }
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump(stdout, stdout_pump));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump(stderr, stderr_pump));
        }

        let (exit_tx, exit) = watch::channel(None);
        let (signals, requests) = mpsc::unbounded_channel();
        tokio::spawn(reap(child, cmd.path.clone(), requests, exit_tx));

        Proc {
            cmd,
            pid,
            signals: Some(signals),
            exit,
            abort,
            stdio,
        }
    }

    fn stdio(&self) -> MutexGuard<'_, Stdio3> {
        self.stdio
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The writer feeding the process's standard input. Taken once.
    pub fn take_stdin(&self) -> Option<DuplexStream> {
        self.stdio().stdin.take()
    }

    /// The reader of the process's standard output. Taken once.
    pub fn take_stdout(&self) -> Option<DuplexStream> {
        self.stdio().stdout.take()
    }

    /// The reader of the process's standard error. Taken once.
    pub fn take_stderr(&self) -> Option<DuplexStream> {
        self.stdio().stderr.take()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Block until the process exits, or fail with `Aborted` on scrub.
    /// Fails with `ExitLost` if the reaper ended without recording an exit.
    pub async fn wait(&self) -> Result<ProcStat> {
        let mut exit = self.exit.clone();
        let mut abort = self.abort.subscribe();
        let exited = async { exit.wait_for(Option::is_some).await.map(|_| ()) };
        let aborted = async {
            let _ = abort.wait_for(|aborted| *aborted).await;
        };
        tokio::select! {
            biased;
            result = exited => match result {
                Ok(()) => Ok(self.peek()),
                Err(_) => {
                    warn!(path = %self.cmd.path, pid = self.pid, "process reaper gone");
                    Err(ProcError::ExitLost)
                }
            },
            () = aborted => Err(ProcError::Aborted),
        }
    }

    /// Deliver a signal by name.
    pub async fn signal(&self, name: &str) -> Result<()> {
        let Some(signals) = &self.signals else {
            return Err(ProcError::NoProcess);
        };
        if self.has_exited() {
            return Err(ProcError::NoProcess);
        }
        let signal = parse_signal(name)
            .and_then(|signo| Signal::try_from(signo).ok())
            .ok_or(ProcError::SignalNotRecognized)?;
        debug!(pid = self.pid, signal = name, "signalling process");

        let (reply, delivered) = oneshot::channel();
        signals
            .send((signal, reply))
            .map_err(|_| ProcError::NoProcess)?;
        delivered.await.map_err(|_| ProcError::NoProcess)?
    }

    fn phase(&self) -> Phase {
        match &*self.exit.borrow() {
            Some(exit) => exit.phase,
            None => Phase::Running,
        }
    }

    /// Last observed status.
    pub fn peek(&self) -> ProcStat {
        let exit = self.exit.borrow().clone();
        ProcStat {
            cmd: self.cmd.clone(),
            exit: exit.as_ref().and_then(|e| e.error.clone()),
            phase: exit.map(|e| e.phase).unwrap_or(Phase::Running),
        }
    }

    pub fn peek_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.peek()).unwrap_or_default()
    }

    /// Detach waiters. The process itself keeps running. Idempotent.
    pub fn scrub(&self) {
        if !self.abort.send_replace(true) {
            debug!(path = %self.cmd.path, pid = self.pid, "process element scrubbed");
        }
    }

    pub fn is_scrubbed(&self) -> bool {
        *self.abort.borrow()
    }

    /// Whether an exit result (including a failed start) has been recorded.
    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Scrubbed, or finished with auto-removal requested.
    pub fn is_done(&self) -> bool {
        if self.is_scrubbed() {
            return true;
        }
        self.phase().is_terminal() && self.cmd.scrub
    }

    pub fn get_cmd(&self) -> Cmd {
        self.cmd.clone()
    }

    /// Environment of the server hosting the process.
    pub fn get_env(&self) -> Vec<String> {
        std::env::vars()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

/// Wait for the child, delivering signal requests until it is reaped.
async fn reap(
    mut child: Child,
    path: String,
    mut requests: mpsc::UnboundedReceiver<SignalRequest>,
    exit_tx: watch::Sender<Option<Exit>>,
) {
    let pid = child.id();
    let target = pid.and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw);
    let exit = loop {
        tokio::select! {
            biased;
            status = child.wait() => {
                break match status {
                    Ok(status) => Exit::from_status(status),
                    Err(err) => Exit {
                        phase: Phase::Exited,
                        error: Some(format!("wait error: {}", err)),
                    },
                };
            }
            Some((signal, reply)) = requests.recv() => {
                let delivered = match target {
                    Some(target) => kill(target, signal)
                        .map_err(|errno| ProcError::Signal(errno.into())),
                    None => Err(ProcError::NoProcess),
                };
                let _ = reply.send(delivered);
            }
        }
    };
    info!(path = %path, pid, phase = %exit.phase, "process exited");
    exit_tx.send_replace(Some(exit));
}

/// Copy until either side closes, then close the writer.
async fn pump<R, W>(mut from: R, mut to: W)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let _ = tokio::io::copy(&mut from, &mut to).await;
    let _ = to.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn missing_binary_is_not_started() {
        let proc = Proc::spawn(Cmd::new("/definitely/not/here"), STD_BUFFER);
        let stat = proc.wait().await.unwrap();
        assert_eq!(stat.phase, Phase::NotStarted);
        assert!(stat.exit.unwrap().starts_with("exec error: "));
        assert!(matches!(
            proc.signal("KILL").await,
            Err(ProcError::NoProcess)
        ));
        assert_eq!(proc.pid(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn every_waiter_sees_the_same_exit() {
        let proc = Arc::new(Proc::spawn(
            Cmd::new("/bin/sh").arg("-c").arg("exit 3"),
            STD_BUFFER,
        ));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let proc = Arc::clone(&proc);
                tokio::spawn(async move { proc.wait().await.unwrap() })
            })
            .collect();
        for w in waiters {
            let stat = w.await.unwrap();
            assert_eq!(stat.phase, Phase::Exited);
            assert_eq!(stat.exit.as_deref(), Some("exit status 3"));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn kill_reports_signaled() {
        let proc = Proc::spawn(Cmd::new("/bin/sleep").arg("30"), STD_BUFFER);
        assert_eq!(proc.peek().phase, Phase::Running);
        assert!(matches!(
            proc.signal("BOGUS").await,
            Err(ProcError::SignalNotRecognized)
        ));
        assert_eq!(proc.peek().phase, Phase::Running);

        proc.signal("KILL").await.unwrap();
        let stat = proc.wait().await.unwrap();
        assert_eq!(stat.phase, Phase::Signaled);
        assert_eq!(stat.exit.as_deref(), Some("signal: KILL"));
        assert!(matches!(
            proc.signal("TERM").await,
            Err(ProcError::NoProcess)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn scrub_aborts_waiters_but_not_process() {
        let proc = Arc::new(Proc::spawn(Cmd::new("/bin/sleep").arg("30"), STD_BUFFER));
        let waiter = tokio::spawn({
            let proc = Arc::clone(&proc);
            async move { proc.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        proc.scrub();
        proc.scrub();
        assert!(matches!(waiter.await.unwrap(), Err(ProcError::Aborted)));
        assert!(proc.is_done());
        assert_eq!(proc.peek().phase, Phase::Running);
        proc.signal("KILL").await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn signals_after_exit_never_reach_the_old_pid() {
        let proc = Arc::new(Proc::spawn(Cmd::new("/bin/true"), STD_BUFFER));
        let pid = proc.pid().unwrap();
        let senders: Vec<_> = (0..8)
            .map(|_| {
                let proc = Arc::clone(&proc);
                tokio::spawn(async move { proc.signal("TERM").await })
            })
            .collect();
        proc.wait().await.unwrap();
        for sender in senders {
            match sender.await.unwrap() {
                Ok(()) | Err(ProcError::NoProcess) => {}
                Err(err) => panic!("unexpected signal outcome for {}: {}", pid, err),
            }
        }
        assert!(matches!(
            proc.signal("TERM").await,
            Err(ProcError::NoProcess)
        ));
    }

    #[tokio::test]
    async fn lost_exit_is_an_error() {
        let (_, exit) = watch::channel(None);
        let (abort, _) = watch::channel(false);
        let proc = Proc {
            cmd: Cmd::new("/bin/true"),
            pid: Some(1),
            signals: None,
            exit,
            abort,
            stdio: Mutex::new(Stdio3 {
                stdin: None,
                stdout: None,
                stderr: None,
            }),
        };
        assert!(matches!(proc.wait().await, Err(ProcError::ExitLost)));
        assert!(matches!(
            proc.signal("TERM").await,
            Err(ProcError::NoProcess)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stdout_is_readable_after_exit() {
        let proc = Proc::spawn(
            Cmd::new("/bin/sh").arg("-c").arg("echo out; echo err >&2"),
            STD_BUFFER,
        );
        proc.wait().await.unwrap();

        let mut out = String::new();
        proc.take_stdout()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out, "out\n");
        let mut err = String::new();
        proc.take_stderr()
            .unwrap()
            .read_to_string(&mut err)
            .await
            .unwrap();
        assert_eq!(err, "err\n");
        assert!(proc.take_stdout().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stdin_reaches_process() {
        let proc = Proc::spawn(Cmd::new("/bin/cat"), STD_BUFFER);
        let mut stdin = proc.take_stdin().unwrap();
        stdin.write_all(b"echoed").await.unwrap();
        stdin.shutdown().await.unwrap();
        drop(stdin);

        let mut out = String::new();
        proc.take_stdout()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        assert_eq!(out, "echoed");
        assert_eq!(proc.wait().await.unwrap().exit, None);
    }

    #[tokio::test]
    async fn environment_and_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut cmd = Cmd::new("/bin/sh").arg("-c").arg("echo $GREETING; pwd");
        cmd.env = vec!["GREETING=hi".to_string()];
        cmd.dir = dir.path().to_string_lossy().into_owned();
        let proc = Proc::spawn(cmd, STD_BUFFER);
        proc.wait().await.unwrap();

        let mut out = String::new();
        proc.take_stdout()
            .unwrap()
            .read_to_string(&mut out)
            .await
            .unwrap();
        let mut lines = out.lines();
        assert_eq!(lines.next(), Some("hi"));
        let pwd = std::fs::canonicalize(lines.next().unwrap()).unwrap();
        assert_eq!(pwd, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn done_only_with_auto_scrub() {
        let plain = Proc::spawn(Cmd::new("/bin/true"), STD_BUFFER);
        plain.wait().await.unwrap();
        assert!(!plain.is_done());

        let auto = Proc::spawn(Cmd::new("/bin/true").with_scrub(true), STD_BUFFER);
        auto.wait().await.unwrap();
        assert!(auto.is_done());
    }

    #[tokio::test]
    async fn path_is_trimmed() {
        let proc = Proc::spawn(Cmd::new("  /bin/true "), STD_BUFFER);
        assert_eq!(proc.get_cmd().path, "/bin/true");
        let stat = proc.wait().await.unwrap();
        assert_eq!(stat.phase, Phase::Exited);
        assert!(!proc.get_env().is_empty());
    }
}
