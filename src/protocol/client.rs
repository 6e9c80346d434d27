//! Worker-side client
//!
//! Blocks the calling thread for every request. Never use it on the thread
//! that drives the server: the server only gets to release the client when
//! its own event loop turns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{PollStatus, ProtocolError, ProtocolResult, SharedRegion, TtyRequest};
use crate::pty::WindowSize;
use crate::termios::{Termios, PACKED_WORDS};

/// Carries requests to the server
///
/// Any `Fn(TtyRequest) -> ProtocolResult<()>` is a sink, which lets a
/// single-threaded harness call the server directly.
pub trait RequestSink {
    fn send(&self, request: TtyRequest) -> ProtocolResult<()>;
}

impl<F> RequestSink for F
where
    F: Fn(TtyRequest) -> ProtocolResult<()>,
{
    fn send(&self, request: TtyRequest) -> ProtocolResult<()> {
        self(request)
    }
}

/// Sends requests over an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<TtyRequest>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<TtyRequest>) -> Self {
        Self { sender }
    }
}

impl RequestSink for ChannelSink {
    fn send(&self, request: TtyRequest) -> ProtocolResult<()> {
        self.sender
            .send(request)
            .map_err(|_| ProtocolError::Disconnected)
    }
}

pub struct TtyClient<S = ChannelSink> {
    region: Arc<SharedRegion>,
    sink: S,
    in_flight: AtomicBool,
    signals: Mutex<mpsc::UnboundedReceiver<Signal>>,
}

impl<S> std::fmt::Debug for TtyClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtyClient")
            .field("region", &self.region)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .finish()
    }
}

/// Clears the in-flight flag however the request ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<S: RequestSink> TtyClient<S> {
    pub fn new(
        region: Arc<SharedRegion>,
        sink: S,
        signals: mpsc::UnboundedReceiver<Signal>,
    ) -> Self {
        Self {
            region,
            sink,
            in_flight: AtomicBool::new(false),
            signals: Mutex::new(signals),
        }
    }

    /// Send one request and block until the server releases us
    fn request(&self, request: TtyRequest) -> ProtocolResult<()> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(ProtocolError::RequestInFlight);
        }
        let _in_flight = InFlight(&self.in_flight);

        tracing::trace!(?request, "tty request");
        self.region.arm();
        self.sink.send(request)?;
        self.region.wait()
    }

    /// Most bytes a single read can return
    pub fn read_capacity(&self) -> usize {
        self.region.data_words().saturating_sub(1)
    }

    /// Read up to `length` bytes (default: as many as fit), blocking until
    /// at least one byte or an end-of-file is available
    ///
    /// An empty result is an end-of-file.
    pub fn read(&self, length: Option<usize>) -> ProtocolResult<Vec<u8>> {
        let length = match length {
            Some(0) => return Ok(Vec::new()),
            Some(length) => length.min(self.read_capacity()),
            None => self.read_capacity(),
        };

        self.request(TtyRequest::Read { length })?;

        let n = self.region.load(0);
        if n < 0 || n as usize > length {
            return Err(ProtocolError::Malformed(format!(
                "read returned {} bytes for a request of {}",
                n, length
            )));
        }
        Ok((1..=n as usize).map(|i| self.region.load(i) as u8).collect())
    }

    /// Hand bytes to the terminal; returns once they are accepted
    pub fn write(&self, bytes: impl AsRef<[u8]>) -> ProtocolResult<()> {
        self.request(TtyRequest::Write {
            bytes: bytes.as_ref().to_vec(),
        })
    }

    /// Wait until input is readable; `None` waits forever
    pub fn poll(&self, timeout: Option<Duration>) -> ProtocolResult<PollStatus> {
        let timeout = timeout.map_or(-1.0, |t| t.as_secs_f64());
        self.request(TtyRequest::Poll { timeout })?;

        let code = self.region.load(0);
        PollStatus::from_code(code)
            .ok_or_else(|| ProtocolError::Malformed(format!("unknown poll status {}", code)))
    }

    pub fn get_attributes(&self) -> ProtocolResult<Termios> {
        self.request(TtyRequest::GetAttributes)?;
        let words = self.region.load_words(0, PACKED_WORDS);
        Ok(Termios::from_words(&words)?)
    }

    pub fn set_attributes(&self, termios: &Termios) -> ProtocolResult<()> {
        self.request(TtyRequest::SetAttributes {
            words: termios.to_words().to_vec(),
        })
    }

    pub fn window_size(&self) -> ProtocolResult<WindowSize> {
        self.request(TtyRequest::GetWindowSize)?;
        let rows = self.region.load(0);
        let cols = self.region.load(1);
        match (u16::try_from(cols), u16::try_from(rows)) {
            (Ok(cols), Ok(rows)) => Ok(WindowSize::new(cols, rows)),
            _ => Err(ProtocolError::Malformed(format!(
                "window size {}x{}",
                cols, rows
            ))),
        }
    }

    /// Signals forwarded by the server since the last call
    pub fn take_signals(&self) -> Vec<Signal> {
        let mut signals = self.signals.lock();
        std::iter::from_fn(|| signals.try_recv().ok()).collect()
    }
}
