//! tty-bridge
//!
//! A POSIX-style terminal line discipline and the plumbing around it:
//!
//! - `termios`: terminal attributes and their packed word format
//! - `ldisc`: the N_TTY line discipline (echo, canonical editing, signals)
//! - `pty`: a master/slave pair wired through one line discipline
//! - `protocol`: blocking access to a slave from another thread
//! - `config`: buffer sizes and the shared region size
//!
//! ```
//! use tty_bridge::pty::openpty;
//!
//! let (master, slave) = openpty();
//! master.input("hello\r");
//! assert_eq!(slave.read(None), b"hello\n");
//! ```

pub mod config;
pub mod event;
pub mod ldisc;
pub mod protocol;
pub mod pty;
pub mod termios;

pub use config::Config;
pub use ldisc::{LdiscError, LineDiscipline};
pub use pty::{openpty, openpty_with, Master, Slave, WindowSize};
pub use termios::Termios;

/// Re-exported so consumers can match on delivered signals
pub use nix::sys::signal::Signal;
