//! Cross-thread TTY protocol
//!
//! The pty pair lives on the home thread and is never touched from anywhere
//! else. A consumer on a worker thread reaches it through a [`TtyClient`]:
//! every call sends one [`TtyRequest`] to the home-side [`TtyServer`] and
//! blocks on the [`SharedRegion`] until the server writes the response there
//! and releases it.
//!
//! Response layout in the data window:
//!
//! ```text
//! Read           [n][b0][b1]...[b(n-1)]      one byte per word, n == 0 on EOF
//! Poll           [status]                    see PollStatus
//! GetAttributes  [w0]...[w12]                packed termios
//! GetWindowSize  [rows][cols]
//! Write, SetAttributes                       nothing
//! ```

mod client;
mod region;
mod server;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::ProtocolConfig;
use crate::pty::Slave;
use crate::termios::TermiosError;

pub use client::{ChannelSink, RequestSink, TtyClient};
pub use region::{SharedRegion, NOT_READY, READY};
pub use server::{ServerCore, ServerState, TtyServer};

/// A request from the worker side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TtyRequest {
    /// Up to `length` bytes of input; waits until there is some
    Read { length: usize },
    Write { bytes: Vec<u8> },
    /// Wait for input to become readable. `timeout` is in seconds; negative
    /// waits forever, zero checks and returns.
    Poll { timeout: f64 },
    GetAttributes,
    SetAttributes { words: Vec<u32> },
    GetWindowSize,
}

/// Outcome of a poll, as stored in the first data word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum PollStatus {
    Ready = 1,
    Timeout = 2,
    /// A signal arrived while waiting
    Interrupted = 3,
}

impl PollStatus {
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Ready),
            2 => Some(Self::Timeout),
            3 => Some(Self::Interrupted),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Error type for protocol operations
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("a request is already in flight on this client")]
    RequestInFlight,

    #[error("tty server is gone")]
    Disconnected,

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Termios(#[from] TermiosError),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Connect a slave to a new client over an in-process channel
///
/// The server must be driven on the thread that owns the slave (it is not
/// `Send`); the client can move to any thread.
pub fn channel(slave: Slave, config: &ProtocolConfig) -> (TtyServer, TtyClient<ChannelSink>) {
    let region = Arc::new(SharedRegion::new(config.shared_words));
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();

    let core = ServerCore::new(slave, Arc::clone(&region), signal_tx);
    let server = TtyServer::new(core, request_rx);
    let client = TtyClient::new(region, ChannelSink::new(request_tx), signal_rx);
    tracing::debug!(shared_words = config.shared_words, "tty channel open");
    (server, client)
}
