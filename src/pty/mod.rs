//! Pseudoterminal pair
//!
//! `openpty()` wires one [`LineDiscipline`] between a [`Master`], which faces
//! the rendering side, and a [`Slave`], which serves as stdin/stdout for a
//! consumer running on the same thread.
//!
//! ```text
//!   renderer  --input/resize-->  Master  --write_from_lower-->  ldisc
//!   renderer  <--OutputChunk---  Master  <--on_write_to_lower-- ldisc
//!   consumer  --write-->         Slave   --write_from_upper-->  ldisc
//!   consumer  <--read/readable-- Slave   <--on_write_to_upper-- ldisc
//! ```
//!
//! Everything here is single-threaded (`Rc`/`RefCell`). Listeners may call
//! back into either endpoint; work that would re-enter the line discipline
//! is queued and run once the outer call returns.

mod master;
mod slave;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::config::PtyConfig;
use crate::event::{EventEmitter, Subscription};
use crate::ldisc::LineDiscipline;
use crate::termios::{Termios, TermiosError};

pub use master::{ChunkAck, Master, OutputChunk};
pub use slave::{Ioctl, IoctlReply, Slave};

/// Get the current termios
pub const TCGETS: u32 = 0x5401;
/// Set the termios now
pub const TCSETS: u32 = 0x5402;
/// Set the termios once output is drained
pub const TCSETSW: u32 = 0x5403;
/// Set the termios once output is drained, discarding unread input
pub const TCSETSF: u32 = 0x5404;
/// Get the window size
pub const TIOCGWINSZ: u32 = 0x5413;

/// Error type for PTY operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("unsupported ioctl request: {0:#06x}")]
    UnsupportedIoctl(u32),

    #[error("invalid termios argument: {0}")]
    Termios(#[from] TermiosError),
}

/// Result type for PTY operations
pub type PtyResult<T> = Result<T, PtyError>;

/// Window size for PTY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    #[serde(default)]
    pub pixel_width: u16,
    #[serde(default)]
    pub pixel_height: u16,
}

impl WindowSize {
    /// Create a new window size with just rows and columns
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    /// Create a new window size with pixel dimensions
    pub fn with_pixels(cols: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width,
            pixel_height,
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

/// Bytes delivered to the consumer, with end-of-file positions
///
/// An end-of-file typed on an empty line has no bytes of its own, so it is
/// recorded as a mark at the stream offset where it happened. A read never
/// crosses a mark and a read that starts on one returns nothing.
#[derive(Debug, Default)]
struct Inbound {
    bytes: VecDeque<u8>,
    eof_marks: VecDeque<u64>,
    /// Stream offset of `bytes[0]`
    consumed: u64,
}

impl Inbound {
    fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            self.eof_marks
                .push_back(self.consumed + self.bytes.len() as u64);
        } else {
            self.bytes.extend(chunk);
        }
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty() && self.eof_marks.is_empty()
    }

    fn take(&mut self, max: Option<usize>) -> Vec<u8> {
        // a zero-length read must not swallow an end-of-file
        if max == Some(0) {
            return Vec::new();
        }
        let mut len = max.map_or(self.bytes.len(), |max| max.min(self.bytes.len()));
        if let Some(&mark) = self.eof_marks.front() {
            let until_mark = (mark - self.consumed) as usize;
            if until_mark == 0 {
                self.eof_marks.pop_front();
                return Vec::new();
            }
            len = len.min(until_mark);
        }
        self.consumed += len as u64;
        self.bytes.drain(..len).collect()
    }

    fn clear(&mut self) {
        self.consumed += self.bytes.len() as u64;
        self.bytes.clear();
        self.eof_marks.clear();
    }
}

/// Work for the line discipline, in arrival order
#[derive(Debug)]
enum Work {
    Termios(Termios),
    /// Device input
    Lower(Vec<u8>),
    /// Consumer output; waits in place while flow is stopped
    Upper(Vec<u8>),
}

/// State shared by both endpoints
struct PtyInner {
    this: Weak<PtyInner>,
    ldisc: RefCell<LineDiscipline>,
    config: PtyConfig,

    /// Termios as last set, readable while the line discipline is busy
    termios: RefCell<Termios>,
    /// Work not yet taken by the line discipline
    work: RefCell<VecDeque<Work>>,

    /// ldisc -> consumer
    inbound: RefCell<Inbound>,
    /// ldisc -> renderer
    to_lower: RefCell<VecDeque<u8>>,
    /// A chunk is out and its acknowledgment has not come back
    waiting_for_lower: Cell<bool>,
    /// `flush_to_lower` is on the stack
    flushing: Cell<bool>,
    /// An acknowledgment came back while flushing
    reflush: Cell<bool>,
    winsize: Cell<WindowSize>,

    on_output: EventEmitter<OutputChunk>,
    on_readable: EventEmitter<()>,
    on_writable: EventEmitter<()>,
    on_signal: EventEmitter<Signal>,

    subscriptions: RefCell<Vec<Subscription>>,
}

impl PtyInner {
    fn new(config: &PtyConfig) -> Rc<Self> {
        let termios = Termios::default();
        let mut config = config.clone();
        if config.chunk_size == 0 {
            tracing::warn!("pty chunk_size of 0, sending one byte at a time");
            config.chunk_size = 1;
        }
        let inner = Rc::new_cyclic(|this| Self {
            this: this.clone(),
            ldisc: RefCell::new(LineDiscipline::with_termios(termios.clone())),
            winsize: Cell::new(config.window),
            config,
            termios: RefCell::new(termios),
            work: RefCell::new(VecDeque::new()),
            inbound: RefCell::new(Inbound::default()),
            to_lower: RefCell::new(VecDeque::new()),
            waiting_for_lower: Cell::new(false),
            flushing: Cell::new(false),
            reflush: Cell::new(false),
            on_output: EventEmitter::new(),
            on_readable: EventEmitter::new(),
            on_writable: EventEmitter::new(),
            on_signal: EventEmitter::new(),
            subscriptions: RefCell::new(Vec::new()),
        });

        let ldisc = inner.ldisc.borrow();
        let subscriptions = vec![
            ldisc.on_write_to_lower(with_weak(&inner.this, |inner, buf: &[u8]| {
                inner.to_lower.borrow_mut().extend(buf);
                if !inner.waiting_for_lower.get() {
                    inner.flush_to_lower();
                }
            })),
            ldisc.on_write_to_upper(with_weak(&inner.this, |inner, buf: &[u8]| {
                inner.inbound.borrow_mut().push(buf);
                inner.on_readable.fire(&());
            })),
            ldisc.on_signal(with_weak(&inner.this, |inner, signal: &Signal| {
                inner.on_signal.fire(signal);
            })),
        ];
        drop(ldisc);
        *inner.subscriptions.borrow_mut() = subscriptions;
        inner
    }

    /// Send chunks to the renderer until one is left unacknowledged
    ///
    /// An acknowledgment given from inside the output listener only flags
    /// the next send, so a burst of chunks runs as a loop here.
    fn flush_to_lower(&self) {
        if self.flushing.replace(true) {
            self.reflush.set(true);
            return;
        }
        loop {
            self.reflush.set(false);
            self.send_chunk();
            if !self.reflush.get() {
                break;
            }
        }
        self.flushing.set(false);
    }

    /// Send the next chunk, or note that nothing is in flight
    fn send_chunk(&self) {
        let chunk: Vec<u8> = {
            let mut to_lower = self.to_lower.borrow_mut();
            if to_lower.is_empty() {
                self.waiting_for_lower.set(false);
                return;
            }
            let len = to_lower.len().min(self.config.chunk_size);
            to_lower.drain(..len).collect()
        };
        self.waiting_for_lower.set(true);

        if self.to_lower.borrow().len() <= self.config.buffer_limit {
            self.on_writable.fire(&());
        }

        tracing::trace!(len = chunk.len(), "chunk to renderer");
        self.on_output
            .fire(&OutputChunk::new(chunk, self.this.clone()));
    }

    /// Consumer output waiting for flow to resume
    fn held_output(&self) -> usize {
        self.work
            .borrow()
            .iter()
            .map(|work| match work {
                Work::Upper(bytes) => bytes.len(),
                _ => 0,
            })
            .sum()
    }

    /// Take the oldest work item the line discipline can accept now
    fn next_work(&self, flow: bool) -> Option<Work> {
        let mut work = self.work.borrow_mut();
        let index = if flow {
            0
        } else {
            work.iter().position(|item| !matches!(item, Work::Upper(_)))?
        };
        work.remove(index)
    }

    fn queue(&self, item: Work) {
        let mut work = self.work.borrow_mut();
        let unmerged = match (work.back_mut(), item) {
            (Some(Work::Lower(last)), Work::Lower(bytes))
            | (Some(Work::Upper(last)), Work::Upper(bytes)) => {
                last.extend(bytes);
                None
            },
            (_, item) => Some(item),
        };
        if let Some(item) = unmerged {
            work.push_back(item);
        }
    }

    /// Run queued work through the line discipline
    ///
    /// A call made while the line discipline is already busy returns at once;
    /// the busy caller picks the work up before it returns.
    fn pump(&self) {
        let Ok(mut ldisc) = self.ldisc.try_borrow_mut() else {
            return;
        };

        while let Some(item) = self.next_work(ldisc.flow()) {
            match item {
                Work::Termios(termios) => ldisc.set_termios(termios),
                Work::Lower(bytes) => ldisc.write_from_lower(bytes),
                Work::Upper(bytes) => {
                    if let Err(err) = ldisc.write_from_upper(&bytes) {
                        tracing::warn!("output held back: {}", err);
                        self.work.borrow_mut().push_front(Work::Upper(bytes));
                        break;
                    }
                },
            }
        }
    }

    fn write_from_lower(&self, bytes: &[u8]) {
        self.queue(Work::Lower(bytes.to_vec()));
        self.pump();
    }

    fn write_from_upper(&self, bytes: &[u8]) {
        self.queue(Work::Upper(bytes.to_vec()));
        self.pump();
    }

    fn set_termios(&self, termios: Termios) {
        *self.termios.borrow_mut() = termios.clone();
        self.queue(Work::Termios(termios));
        self.pump();
    }
}

/// Adapt a listener to hold only a weak reference to the pair, so the
/// line discipline's listeners never keep their owner alive
fn with_weak<A: ?Sized>(
    inner: &Weak<PtyInner>,
    f: impl Fn(&PtyInner, &A) + 'static,
) -> impl Fn(&A) + 'static {
    let weak = inner.clone();
    move |arg| {
        if let Some(inner) = weak.upgrade() {
            f(inner.as_ref(), arg);
        }
    }
}

/// Create a connected master/slave pair with default settings
pub fn openpty() -> (Master, Slave) {
    openpty_with(&PtyConfig::default())
}

/// Create a connected master/slave pair
pub fn openpty_with(config: &PtyConfig) -> (Master, Slave) {
    let inner = PtyInner::new(config);
    tracing::debug!(
        buffer_limit = config.buffer_limit,
        chunk_size = config.chunk_size,
        "opened pty"
    );
    (Master::new(Rc::clone(&inner)), Slave::new(inner))
}
