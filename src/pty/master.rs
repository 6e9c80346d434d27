//! Renderer-facing endpoint

use std::cell::Cell;
use std::rc::{Rc, Weak};

use nix::sys::signal::Signal;

use super::{PtyInner, WindowSize};
use crate::event::Subscription;

/// Completion callback for one [`OutputChunk`]
///
/// The next chunk is only sent once this is called. Calling it more than
/// once has no further effect.
#[derive(Clone)]
pub struct ChunkAck {
    inner: Weak<PtyInner>,
    done: Rc<Cell<bool>>,
}

impl ChunkAck {
    /// Report that the chunk has been presented
    pub fn done(&self) {
        if self.done.replace(true) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.flush_to_lower();
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.get()
    }
}

impl std::fmt::Debug for ChunkAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkAck")
            .field("done", &self.done.get())
            .finish()
    }
}

/// Bytes for the renderer
#[derive(Debug)]
pub struct OutputChunk {
    pub data: Vec<u8>,
    pub ack: ChunkAck,
}

impl OutputChunk {
    pub(super) fn new(data: Vec<u8>, inner: Weak<PtyInner>) -> Self {
        Self {
            data,
            ack: ChunkAck {
                inner,
                done: Rc::new(Cell::new(false)),
            },
        }
    }
}

/// The renderer side of a pty pair
pub struct Master {
    inner: Rc<PtyInner>,
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("waiting_for_lower", &self.inner.waiting_for_lower.get())
            .field("queued", &self.inner.to_lower.borrow().len())
            .finish()
    }
}

impl Master {
    pub(super) fn new(inner: Rc<PtyInner>) -> Self {
        Self { inner }
    }

    /// Keyboard (or paste) input from the renderer
    pub fn input(&self, bytes: impl AsRef<[u8]>) {
        self.inner.write_from_lower(bytes.as_ref());
    }

    /// The renderer changed size; the consumer gets `SIGWINCH`
    pub fn resize(&self, size: WindowSize) {
        tracing::debug!(cols = size.cols, rows = size.rows, "resize");
        self.inner.winsize.set(size);
        self.inner.on_signal.fire(&Signal::SIGWINCH);
    }

    /// Output for the renderer, one chunk at a time
    ///
    /// Each chunk must be acknowledged through [`OutputChunk::ack`] once it
    /// has been presented.
    pub fn on_output(&self, listener: impl Fn(&OutputChunk) + 'static) -> Subscription {
        self.inner.on_output.subscribe(listener)
    }

    /// Whether a chunk is out and not yet acknowledged
    pub fn waiting_for_ack(&self) -> bool {
        self.inner.waiting_for_lower.get()
    }

    /// Bytes queued behind the chunk in flight
    pub fn queued(&self) -> usize {
        self.inner.to_lower.borrow().len()
    }
}
