//! The valve: a bounded rendezvous queue of byte pipes.
//!
//! A message is not a value. `send` hands back the write end of a fresh
//! pipe and `recv` the matching read end, so a matched pair talks directly.
//! The capacity bounds how many sends may be admitted before a receiver
//! shows up.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::DuplexStream;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Pipe buffer between a matched sender and receiver.
pub const MESSAGE_CAP: usize = 32_000;

/// Write end handed to a sender.
pub type MessageWriter = DuplexStream;

/// Read end handed to a receiver.
pub type MessageReader = DuplexStream;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ValveError {
    #[error("channel has been closed")]
    Closed,

    #[error("channel already closed")]
    AlreadyClosed,

    #[error("channel has been aborted")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, ValveError>;

/// Point-in-time counters of a valve.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stat {
    pub cap: usize,
    pub opened: bool,
    pub closed: bool,
    pub aborted: bool,
    #[serde(rename = "numsend")]
    pub num_send: u64,
    #[serde(rename = "numrecv")]
    pub num_recv: u64,
}

struct BlockedSend {
    reader: MessageReader,
    admitted: oneshot::Sender<()>,
}

struct State {
    queue: VecDeque<MessageReader>,
    senders: VecDeque<BlockedSend>,
    receivers: VecDeque<oneshot::Sender<MessageReader>>,
    stat: Stat,
}

pub struct Valve {
    state: Mutex<State>,
    buffer: usize,
}

impl Valve {
    pub fn new(cap: usize) -> Self {
        Self::with_buffer(cap, MESSAGE_CAP)
    }

    pub fn with_buffer(cap: usize, buffer: usize) -> Self {
        Valve {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                senders: VecDeque::new(),
                receivers: VecDeque::new(),
                stat: Stat {
                    cap,
                    opened: true,
                    ..Stat::default()
                },
            }),
            buffer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Why a waiter was dropped from the valve.
    fn failure(&self) -> ValveError {
        if self.lock().stat.aborted {
            ValveError::Aborted
        } else {
            ValveError::Closed
        }
    }

    /// Open a message.
    ///
    /// Resolves once a receiver takes the message or it is admitted into
    /// the queue.
    pub async fn send(&self) -> Result<MessageWriter> {
        let (writer, mut reader) = tokio::io::duplex(self.buffer);
        let admitted = {
            let mut st = self.lock();
            if st.stat.aborted {
                return Err(ValveError::Aborted);
            }
            if st.stat.closed {
                return Err(ValveError::Closed);
            }
            while let Some(waiter) = st.receivers.pop_front() {
                match waiter.send(reader) {
                    Ok(()) => {
                        st.stat.num_send += 1;
                        st.stat.num_recv += 1;
                        return Ok(writer);
                    }
                    // receiver gave up; try the next one
                    Err(back) => reader = back,
                }
            }
            if st.queue.len() < st.stat.cap {
                st.queue.push_back(reader);
                st.stat.num_send += 1;
                return Ok(writer);
            }
            let (tx, rx) = oneshot::channel();
            st.senders.push_back(BlockedSend {
                reader,
                admitted: tx,
            });
            rx
        };
        match admitted.await {
            Ok(()) => Ok(writer),
            Err(_) => Err(self.failure()),
        }
    }

    /// Take the next message.
    pub async fn recv(&self) -> Result<MessageReader> {
        let delivery = {
            let mut st = self.lock();
            if st.stat.aborted {
                return Err(ValveError::Aborted);
            }
            if let Some(reader) = st.queue.pop_front() {
                st.stat.num_recv += 1;
                Self::promote(&mut st);
                return Ok(reader);
            }
            while let Some(blocked) = st.senders.pop_front() {
                if blocked.admitted.send(()).is_ok() {
                    st.stat.num_send += 1;
                    st.stat.num_recv += 1;
                    return Ok(blocked.reader);
                }
            }
            if st.stat.closed {
                return Err(ValveError::Closed);
            }
            let (tx, rx) = oneshot::channel();
            st.receivers.push_back(tx);
            rx
        };
        delivery.await.map_err(|_| self.failure())
    }

    /// Move one blocked sender into the queue, if there is room.
    fn promote(st: &mut State) {
        while st.queue.len() < st.stat.cap {
            let Some(blocked) = st.senders.pop_front() else {
                return;
            };
            if blocked.admitted.send(()).is_ok() {
                st.queue.push_back(blocked.reader);
                st.stat.num_send += 1;
                return;
            }
        }
    }

    /// Stop admitting sends. Queued messages stay receivable.
    pub fn close(&self) -> Result<()> {
        let mut st = self.lock();
        if st.stat.closed {
            return Err(ValveError::AlreadyClosed);
        }
        st.stat.closed = true;
        // dropping the waiters' channels fails them with Closed
        st.senders.clear();
        st.receivers.clear();
        info!(queued = st.queue.len(), "valve closed");
        Ok(())
    }

    /// Abort. Queued messages are discarded and every waiter fails.
    pub fn scrub(&self) {
        let mut st = self.lock();
        if st.stat.aborted {
            return;
        }
        st.stat.aborted = true;
        let discarded = st.queue.len();
        st.queue.clear();
        st.senders.clear();
        st.receivers.clear();
        debug!(discarded, "valve aborted");
    }

    pub fn stat(&self) -> Stat {
        self.lock().stat.clone()
    }

    pub fn cap(&self) -> usize {
        self.lock().stat.cap
    }

    /// Aborted, or closed with nothing left to receive.
    pub fn is_done(&self) -> bool {
        let st = self.lock();
        st.stat.aborted || (st.stat.closed && st.queue.is_empty())
    }

    pub fn peek_bytes(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(&self.stat()).unwrap_or_default()
    }
}
