//! Home-side server
//!
//! [`ServerCore`] is the synchronous state machine; [`TtyServer`] drives it
//! from a tokio event loop. Slave events only raise flags in an [`Inbox`],
//! so nothing here runs inside a line discipline callback.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use super::{PollStatus, SharedRegion, TtyRequest};
use crate::event::Subscription;
use crate::pty::Slave;
use crate::termios::Termios;

/// What the client is blocked on
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServerState {
    Idle,
    AwaitingInput { length: usize },
    /// `deadline` is `None` for a poll without timeout
    AwaitingPoll { deadline: Option<Instant> },
}

/// Slave events not yet handled
#[derive(Default)]
struct Inbox {
    readable: Cell<bool>,
    writable: Cell<bool>,
    signals: RefCell<Vec<Signal>>,
    notify: Notify,
}

pub struct ServerCore {
    slave: Slave,
    region: Arc<SharedRegion>,
    state: ServerState,
    /// Bytes written by the worker that the slave has not taken yet
    from_worker: Vec<u8>,
    inbox: Rc<Inbox>,
    signals: mpsc::UnboundedSender<Signal>,
    _subscriptions: Vec<Subscription>,
}

impl std::fmt::Debug for ServerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCore")
            .field("state", &self.state)
            .field("from_worker", &self.from_worker.len())
            .finish()
    }
}

impl ServerCore {
    pub fn new(
        slave: Slave,
        region: Arc<SharedRegion>,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        let inbox = Rc::new(Inbox::default());

        let readable = Rc::clone(&inbox);
        let writable = Rc::clone(&inbox);
        let signal = Rc::clone(&inbox);
        let subscriptions = vec![
            slave.on_readable(move |_| {
                readable.readable.set(true);
                readable.notify.notify_one();
            }),
            slave.on_writable(move |_| {
                writable.writable.set(true);
                writable.notify.notify_one();
            }),
            slave.on_signal(move |sig| {
                signal.signals.borrow_mut().push(*sig);
                signal.notify.notify_one();
            }),
        ];

        Self {
            slave,
            region,
            state: ServerState::Idle,
            from_worker: Vec::new(),
            inbox,
            signals,
            _subscriptions: subscriptions,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn slave(&self) -> &Slave {
        &self.slave
    }

    /// When a pending poll times out, if one does
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            ServerState::AwaitingPoll { deadline } => deadline,
            _ => None,
        }
    }

    fn ack(&mut self) {
        self.state = ServerState::Idle;
        self.region.release();
    }

    /// Handle one request from the client
    pub fn handle(&mut self, request: TtyRequest) {
        if self.state != ServerState::Idle {
            tracing::warn!(state = ?self.state, "request while another is outstanding");
        }

        match request {
            TtyRequest::Read { length } => {
                self.state = ServerState::AwaitingInput { length };
                if self.slave.readable() {
                    self.feed_to_worker(length);
                }
            },
            TtyRequest::Write { bytes } => {
                self.from_worker.extend_from_slice(&bytes);
                self.feed_from_worker();
                self.ack();
            },
            TtyRequest::Poll { timeout } => self.wait_for_readable(timeout),
            TtyRequest::GetAttributes => {
                let words = self.slave.tcgetattr().to_words();
                self.region.store_words(0, &words);
                self.ack();
            },
            TtyRequest::SetAttributes { words } => {
                match Termios::from_words(&words) {
                    Ok(termios) => self.slave.tcsetattr(termios),
                    Err(err) => tracing::error!("ignoring set attributes: {}", err),
                }
                self.ack();
            },
            TtyRequest::GetWindowSize => {
                let size = self.slave.window_size();
                self.region.store(0, i32::from(size.rows));
                self.region.store(1, i32::from(size.cols));
                self.ack();
            },
        }
    }

    /// Act on slave events and an expired poll timer
    pub fn process_events(&mut self) {
        let signals = std::mem::take(&mut *self.inbox.signals.borrow_mut());
        for signal in signals {
            tracing::debug!(?signal, "forwarding signal to worker");
            if self.signals.send(signal).is_err() {
                tracing::trace!("signal dropped (client gone)");
            }
            if matches!(self.state, ServerState::AwaitingPoll { .. }) {
                self.respond_poll(PollStatus::Interrupted);
            }
        }

        if self.inbox.readable.take() {
            match self.state {
                ServerState::AwaitingInput { length } if self.slave.readable() => {
                    self.feed_to_worker(length);
                },
                ServerState::AwaitingPoll { .. } if self.slave.readable() => {
                    self.respond_poll(PollStatus::Ready);
                },
                _ => {},
            }
        }

        if self.inbox.writable.take() && !self.from_worker.is_empty() {
            self.feed_from_worker();
        }

        if let Some(deadline) = self.deadline() {
            if Instant::now() >= deadline {
                self.respond_poll(PollStatus::Timeout);
            }
        }
    }

    fn feed_to_worker(&mut self, length: usize) {
        let length = length.min(self.region.data_words().saturating_sub(1));
        let bytes = self.slave.read(Some(length));
        self.region.store(0, bytes.len() as i32);
        for (i, &b) in bytes.iter().enumerate() {
            self.region.store(i + 1, i32::from(b));
        }
        tracing::trace!(len = bytes.len(), "fed worker");
        self.ack();
    }

    fn feed_from_worker(&mut self) {
        if self.slave.writable() {
            let bytes = std::mem::take(&mut self.from_worker);
            self.slave.write(bytes);
        } else {
            tracing::debug!(held = self.from_worker.len(), "slave not writable; holding output");
        }
    }

    fn wait_for_readable(&mut self, timeout: f64) {
        if self.slave.readable() {
            self.respond_poll(PollStatus::Ready);
        } else if timeout < 0.0 {
            self.state = ServerState::AwaitingPoll { deadline: None };
        } else if timeout > 0.0 {
            // too far out to represent is the same as no timeout
            let deadline = Duration::try_from_secs_f64(timeout)
                .ok()
                .and_then(|timeout| Instant::now().checked_add(timeout));
            self.state = ServerState::AwaitingPoll { deadline };
        } else {
            self.respond_poll(PollStatus::Timeout);
        }
    }

    fn respond_poll(&mut self, status: PollStatus) {
        self.region.store(0, status.code());
        self.ack();
    }
}

impl Drop for ServerCore {
    fn drop(&mut self) {
        self.region.close();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

enum Wake {
    Request(Option<TtyRequest>),
    Event,
}

/// Event loop around a [`ServerCore`]
#[derive(Debug)]
pub struct TtyServer {
    core: ServerCore,
    requests: mpsc::UnboundedReceiver<TtyRequest>,
}

impl TtyServer {
    pub fn new(core: ServerCore, requests: mpsc::UnboundedReceiver<TtyRequest>) -> Self {
        Self { core, requests }
    }

    pub fn core(&self) -> &ServerCore {
        &self.core
    }

    /// Serve until every client handle is dropped
    ///
    /// Must run on the thread that owns the slave, e.g. inside a
    /// `tokio::task::LocalSet`.
    pub async fn run(mut self) {
        tracing::debug!("tty server running");
        loop {
            let inbox = Rc::clone(&self.core.inbox);
            let deadline = self.core.deadline();

            let wake = tokio::select! {
                request = self.requests.recv() => Wake::Request(request),
                _ = inbox.notify.notified() => Wake::Event,
                _ = sleep_until(deadline) => Wake::Event,
            };

            match wake {
                Wake::Request(Some(request)) => self.core.handle(request),
                Wake::Request(None) => break,
                Wake::Event => {},
            }
            self.core.process_events();
        }
        tracing::debug!("tty server stopped");
    }
}
