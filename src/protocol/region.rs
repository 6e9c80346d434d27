//! Shared control word and data window
//!
//! The one piece of memory both sides touch. The client arms the control
//! word, sends its request and sleeps until the server fills the data window
//! and releases it. Sleeping is futex-style: a waiter parks only while the
//! control word still holds `NOT_READY`.

use std::sync::atomic::{AtomicI32, Ordering};

use parking_lot::{Condvar, Mutex};

use super::ProtocolError;
use crate::termios::PACKED_WORDS;

/// Control word value while a request is outstanding
pub const NOT_READY: i32 = 0;
/// Control word value once the response is in place
pub const READY: i32 = 1;
/// The server is gone; no response will come
const CLOSED: i32 = -1;

pub struct SharedRegion {
    control: AtomicI32,
    data: Box<[AtomicI32]>,
    lock: Mutex<()>,
    wakeup: Condvar,
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("control", &self.control.load(Ordering::Relaxed))
            .field("data_words", &self.data.len())
            .finish()
    }
}

impl SharedRegion {
    /// A region with `data_words` words after the control word
    ///
    /// Never smaller than a packed termios, the largest fixed-size response.
    pub fn new(data_words: usize) -> Self {
        if data_words < PACKED_WORDS {
            tracing::warn!(data_words, "shared region too small, using {}", PACKED_WORDS);
        }
        let data_words = data_words.max(PACKED_WORDS);
        Self {
            control: AtomicI32::new(READY),
            data: (0..data_words).map(|_| AtomicI32::new(0)).collect(),
            lock: Mutex::new(()),
            wakeup: Condvar::new(),
        }
    }

    pub fn data_words(&self) -> usize {
        self.data.len()
    }

    /// Mark a request as outstanding. A closed region stays closed.
    pub fn arm(&self) {
        let _ = self
            .control
            .compare_exchange(READY, NOT_READY, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Block until the control word leaves `NOT_READY`
    pub fn wait(&self) -> Result<(), ProtocolError> {
        let mut guard = self.lock.lock();
        loop {
            match self.control.load(Ordering::Acquire) {
                NOT_READY => self.wakeup.wait(&mut guard),
                CLOSED => return Err(ProtocolError::Disconnected),
                _ => return Ok(()),
            }
        }
    }

    /// Publish the response and wake the waiter
    pub fn release(&self) {
        let _guard = self.lock.lock();
        let _ = self
            .control
            .compare_exchange(NOT_READY, READY, Ordering::AcqRel, Ordering::Acquire);
        self.wakeup.notify_one();
    }

    /// Fail the current and every later wait
    pub fn close(&self) {
        let _guard = self.lock.lock();
        self.control.store(CLOSED, Ordering::Release);
        self.wakeup.notify_all();
    }

    pub fn is_ready(&self) -> bool {
        self.control.load(Ordering::Acquire) == READY
    }

    pub fn is_closed(&self) -> bool {
        self.control.load(Ordering::Acquire) == CLOSED
    }

    /// # Panics
    /// If `index` is outside the data window.
    pub fn store(&self, index: usize, value: i32) {
        self.data[index].store(value, Ordering::Relaxed);
    }

    /// # Panics
    /// If `index` is outside the data window.
    pub fn load(&self, index: usize) -> i32 {
        self.data[index].load(Ordering::Relaxed)
    }

    pub fn store_words(&self, offset: usize, words: &[u32]) {
        for (i, &word) in words.iter().enumerate() {
            self.store(offset + i, word as i32);
        }
    }

    pub fn load_words(&self, offset: usize, count: usize) -> Vec<u32> {
        (offset..offset + count)
            .map(|i| self.load(i) as u32)
            .collect()
    }
}
