//! Consumer-facing endpoint

use std::rc::Rc;

use nix::sys::signal::Signal;

use super::{PtyError, PtyInner, PtyResult, WindowSize};
use super::{TCGETS, TCSETS, TCSETSF, TCSETSW, TIOCGWINSZ};
use crate::event::Subscription;
use crate::termios::Termios;

/// A terminal control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ioctl {
    GetAttributes,
    SetAttributes(Termios),
    /// Output drains synchronously, so this behaves like `SetAttributes`
    SetAttributesDrain(Termios),
    /// Discards input the consumer has not read yet, then sets
    SetAttributesFlush(Termios),
    GetWindowSize,
}

impl Ioctl {
    /// Decode a raw request code; `arg` is a packed termios for the set
    /// requests and ignored otherwise
    pub fn from_raw(request: u32, arg: &[u32]) -> PtyResult<Self> {
        Ok(match request {
            TCGETS => Self::GetAttributes,
            TCSETS => Self::SetAttributes(Termios::from_words(arg)?),
            TCSETSW => Self::SetAttributesDrain(Termios::from_words(arg)?),
            TCSETSF => Self::SetAttributesFlush(Termios::from_words(arg)?),
            TIOCGWINSZ => Self::GetWindowSize,
            other => return Err(PtyError::UnsupportedIoctl(other)),
        })
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::GetAttributes => TCGETS,
            Self::SetAttributes(_) => TCSETS,
            Self::SetAttributesDrain(_) => TCSETSW,
            Self::SetAttributesFlush(_) => TCSETSF,
            Self::GetWindowSize => TIOCGWINSZ,
        }
    }
}

/// Result of an [`Ioctl`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoctlReply {
    Attributes(Termios),
    WindowSize(WindowSize),
    Done,
}

/// The consumer side of a pty pair
pub struct Slave {
    inner: Rc<PtyInner>,
}

impl std::fmt::Debug for Slave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slave")
            .field("readable", &self.readable())
            .field("writable", &self.writable())
            .finish()
    }
}

impl Slave {
    pub(super) fn new(inner: Rc<PtyInner>) -> Self {
        Self { inner }
    }

    /// Take up to `max` bytes of delivered input, or all of it
    ///
    /// Never blocks. An empty result while [`readable()`](Self::readable) was
    /// true is an end-of-file.
    pub fn read(&self, max: Option<usize>) -> Vec<u8> {
        self.inner.inbound.borrow_mut().take(max)
    }

    /// Whether `read` has something to return, including an end-of-file
    pub fn readable(&self) -> bool {
        !self.inner.inbound.borrow().is_empty()
    }

    /// Queue output; it goes through the line discipline right away unless
    /// output is stopped
    pub fn write(&self, bytes: impl AsRef<[u8]>) {
        self.inner.write_from_upper(bytes.as_ref());
    }

    /// Whether the held-back output is within the buffer limit
    pub fn writable(&self) -> bool {
        self.inner.held_output() <= self.inner.config.buffer_limit
    }

    pub fn ioctl(&self, request: Ioctl) -> IoctlReply {
        match request {
            Ioctl::GetAttributes => IoctlReply::Attributes(self.tcgetattr()),
            Ioctl::SetAttributes(termios) | Ioctl::SetAttributesDrain(termios) => {
                self.tcsetattr(termios);
                IoctlReply::Done
            },
            Ioctl::SetAttributesFlush(termios) => {
                self.inner.inbound.borrow_mut().clear();
                self.tcsetattr(termios);
                IoctlReply::Done
            },
            Ioctl::GetWindowSize => IoctlReply::WindowSize(self.window_size()),
        }
    }

    /// `ioctl` from a raw request code
    pub fn ioctl_raw(&self, request: u32, arg: &[u32]) -> PtyResult<IoctlReply> {
        let request = Ioctl::from_raw(request, arg)?;
        Ok(self.ioctl(request))
    }

    pub fn tcgetattr(&self) -> Termios {
        self.inner.termios.borrow().clone()
    }

    pub fn tcsetattr(&self, termios: Termios) {
        tracing::debug!(
            iflag = termios.iflag(),
            oflag = termios.oflag(),
            lflag = termios.lflag(),
            "set termios"
        );
        self.inner.set_termios(termios);
    }

    /// The size last reported by the renderer
    pub fn window_size(&self) -> WindowSize {
        self.inner.winsize.get()
    }

    pub fn on_readable(&self, listener: impl Fn(&()) + 'static) -> Subscription {
        self.inner.on_readable.subscribe(listener)
    }

    pub fn on_writable(&self, listener: impl Fn(&()) + 'static) -> Subscription {
        self.inner.on_writable.subscribe(listener)
    }

    /// Signals from the line discipline, plus `SIGWINCH` on resize
    pub fn on_signal(&self, listener: impl Fn(&Signal) + 'static) -> Subscription {
        self.inner.on_signal.subscribe(listener)
    }
}
