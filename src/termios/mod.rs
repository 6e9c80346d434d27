//! Termios snapshot
//!
//! An immutable record of the four flag words and the control-character
//! table. Changing the configuration means building a new snapshot and
//! swapping it in whole; the line discipline never sees a half-updated one.
//!
//! Flag values are the Linux ones, which is also what the packed word format
//! carries across the protocol boundary.
//!
//! Reference: https://man7.org/linux/man-pages/man3/termios.3.html

mod codec;

pub use codec::PACKED_WORDS;

/// Number of control characters in `c_cc`
pub const NCCS: usize = 32;

// =============================================================================
// Input flags (c_iflag)
// =============================================================================

/// Strip the eighth bit
pub const ISTRIP: u32 = 0x0020;
/// Map NL to CR on input
pub const INLCR: u32 = 0x0040;
/// Ignore CR on input
pub const IGNCR: u32 = 0x0080;
/// Map CR to NL on input (unless IGNCR is set)
pub const ICRNL: u32 = 0x0100;
/// Map uppercase to lowercase on input (with IEXTEN)
pub const IUCLC: u32 = 0x0200;
/// Enable XON/XOFF flow control on output
pub const IXON: u32 = 0x0400;
/// Any character restarts stopped output
pub const IXANY: u32 = 0x0800;
/// Ring the bell when the input queue is full (accepted, not acted upon)
pub const IMAXBEL: u32 = 0x2000;
/// Input is UTF-8
pub const IUTF8: u32 = 0x4000;

// =============================================================================
// Output flags (c_oflag)
// =============================================================================

/// Enable output processing
pub const OPOST: u32 = 0x0001;
/// Map lowercase to uppercase on output
pub const OLCUC: u32 = 0x0002;
/// Map NL to CR-NL on output
pub const ONLCR: u32 = 0x0004;
/// Map CR to NL on output
pub const OCRNL: u32 = 0x0008;
/// Don't output CR at column 0
pub const ONOCR: u32 = 0x0010;
/// NL performs the CR function
pub const ONLRET: u32 = 0x0020;
/// Horizontal tab delay mask
pub const TABDLY: u32 = 0x1800;
/// Expand tabs to spaces
pub const XTABS: u32 = 0x1800;

// =============================================================================
// Local flags (c_lflag)
// =============================================================================

/// Generate signals for INTR, QUIT, SUSP
pub const ISIG: u32 = 0x0001;
/// Canonical mode (line-by-line input)
pub const ICANON: u32 = 0x0002;
/// Echo input characters
pub const ECHO: u32 = 0x0008;
/// ERASE erases the preceding character visually
pub const ECHOE: u32 = 0x0010;
/// KILL erases the current line visually
pub const ECHOK: u32 = 0x0020;
/// Echo NL even if ECHO is not set
pub const ECHONL: u32 = 0x0040;
/// Don't flush queues on INTR, QUIT, SUSP
pub const NOFLSH: u32 = 0x0080;
/// Echo control characters as ^X
pub const ECHOCTL: u32 = 0x0200;
/// Print erased characters between `\` and `/`
pub const ECHOPRT: u32 = 0x0400;
/// KILL erases each character on the line
pub const ECHOKE: u32 = 0x0800;
/// Enable implementation-defined input processing
pub const IEXTEN: u32 = 0x8000;

// =============================================================================
// Control character indices (c_cc)
// =============================================================================

pub const VINTR: usize = 0;
pub const VQUIT: usize = 1;
pub const VERASE: usize = 2;
pub const VKILL: usize = 3;
pub const VEOF: usize = 4;
/// Not interpreted
pub const VTIME: usize = 5;
/// Not interpreted
pub const VMIN: usize = 6;
/// Not interpreted
pub const VSWTCH: usize = 7;
pub const VSTART: usize = 8;
pub const VSTOP: usize = 9;
pub const VSUSP: usize = 10;
pub const VEOL: usize = 11;
pub const VREPRINT: usize = 12;
/// Not interpreted
pub const VDISCARD: usize = 13;
pub const VWERASE: usize = 14;
pub const VLNEXT: usize = 15;
pub const VEOL2: usize = 16;

const DEFAULT_CC: [u8; NCCS] = [
    0x03, 0x1c, 0x7f, 0x15, 0x04, 0x00, 0x01, 0x00, 0x11, 0x13, 0x1a, 0x00, 0x12, 0x0f, 0x17,
    0x16, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00,
];

/// Error decoding a packed termios
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TermiosError {
    #[error("packed termios needs {expected} words, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Flag predicates, computed once per snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Predicates {
    istrip: bool,
    inlcr: bool,
    igncr: bool,
    icrnl: bool,
    iuclc: bool,
    ixon: bool,
    ixany: bool,
    iutf8: bool,
    opost: bool,
    olcuc: bool,
    onlcr: bool,
    ocrnl: bool,
    onocr: bool,
    onlret: bool,
    xtabs: bool,
    isig: bool,
    icanon: bool,
    echo: bool,
    echoe: bool,
    echok: bool,
    echonl: bool,
    noflsh: bool,
    echoctl: bool,
    echoprt: bool,
    echoke: bool,
    iexten: bool,
}

impl Predicates {
    fn derive(iflag: u32, oflag: u32, lflag: u32) -> Self {
        Self {
            istrip: iflag & ISTRIP != 0,
            inlcr: iflag & INLCR != 0,
            igncr: iflag & IGNCR != 0,
            icrnl: iflag & ICRNL != 0,
            iuclc: iflag & IUCLC != 0,
            ixon: iflag & IXON != 0,
            ixany: iflag & IXANY != 0,
            iutf8: iflag & IUTF8 != 0,
            opost: oflag & OPOST != 0,
            olcuc: oflag & OLCUC != 0,
            onlcr: oflag & ONLCR != 0,
            ocrnl: oflag & OCRNL != 0,
            onocr: oflag & ONOCR != 0,
            onlret: oflag & ONLRET != 0,
            xtabs: oflag & TABDLY == XTABS,
            isig: lflag & ISIG != 0,
            icanon: lflag & ICANON != 0,
            echo: lflag & ECHO != 0,
            echoe: lflag & ECHOE != 0,
            echok: lflag & ECHOK != 0,
            echonl: lflag & ECHONL != 0,
            noflsh: lflag & NOFLSH != 0,
            echoctl: lflag & ECHOCTL != 0,
            echoprt: lflag & ECHOPRT != 0,
            echoke: lflag & ECHOKE != 0,
            iexten: lflag & IEXTEN != 0,
        }
    }
}

/// Terminal attributes
///
/// Unknown bits are carried along untouched; only the documented ones are
/// interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termios {
    iflag: u32,
    oflag: u32,
    cflag: u32,
    lflag: u32,
    cc: [u8; NCCS],
    predicates: Predicates,
}

impl Default for Termios {
    fn default() -> Self {
        Self::new(
            ICRNL | IXON | IMAXBEL | IUTF8,
            OPOST | ONLCR,
            0x00bf, // c_cflag is stored, never interpreted
            ISIG | ICANON | ECHO | ECHOE | ECHOK | ECHOCTL | ECHOKE | IEXTEN,
            DEFAULT_CC,
        )
    }
}

impl Termios {
    /// Build a snapshot from raw flag words and control characters
    pub fn new(iflag: u32, oflag: u32, cflag: u32, lflag: u32, cc: [u8; NCCS]) -> Self {
        Self {
            iflag,
            oflag,
            cflag,
            lflag,
            cc,
            predicates: Predicates::derive(iflag, oflag, lflag),
        }
    }

    /// The default attributes with input/output processing turned off,
    /// the way `cfmakeraw` leaves a terminal
    pub fn raw() -> Self {
        let t = Self::default();
        t.with_flags(
            t.iflag & !(ISTRIP | INLCR | IGNCR | ICRNL | IXON),
            t.oflag & !OPOST,
            t.cflag,
            t.lflag & !(ECHO | ECHONL | ICANON | ISIG | IEXTEN),
        )
    }

    /// A copy with different flag words and the same control characters
    pub fn with_flags(&self, iflag: u32, oflag: u32, cflag: u32, lflag: u32) -> Self {
        Self::new(iflag, oflag, cflag, lflag, self.cc)
    }

    /// A copy with one control character replaced
    ///
    /// # Panics
    /// If `index >= NCCS`.
    pub fn with_cc(&self, index: usize, value: u8) -> Self {
        let mut cc = self.cc;
        cc[index] = value;
        Self::new(self.iflag, self.oflag, self.cflag, self.lflag, cc)
    }

    pub fn iflag(&self) -> u32 {
        self.iflag
    }

    pub fn oflag(&self) -> u32 {
        self.oflag
    }

    pub fn cflag(&self) -> u32 {
        self.cflag
    }

    pub fn lflag(&self) -> u32 {
        self.lflag
    }

    pub fn cc(&self) -> &[u8; NCCS] {
        &self.cc
    }

    // Input predicates

    pub fn istrip(&self) -> bool {
        self.predicates.istrip
    }

    pub fn inlcr(&self) -> bool {
        self.predicates.inlcr
    }

    pub fn igncr(&self) -> bool {
        self.predicates.igncr
    }

    pub fn icrnl(&self) -> bool {
        self.predicates.icrnl
    }

    pub fn iuclc(&self) -> bool {
        self.predicates.iuclc
    }

    pub fn ixon(&self) -> bool {
        self.predicates.ixon
    }

    pub fn ixany(&self) -> bool {
        self.predicates.ixany
    }

    pub fn iutf8(&self) -> bool {
        self.predicates.iutf8
    }

    // Output predicates

    pub fn opost(&self) -> bool {
        self.predicates.opost
    }

    pub fn olcuc(&self) -> bool {
        self.predicates.olcuc
    }

    pub fn onlcr(&self) -> bool {
        self.predicates.onlcr
    }

    pub fn ocrnl(&self) -> bool {
        self.predicates.ocrnl
    }

    pub fn onocr(&self) -> bool {
        self.predicates.onocr
    }

    pub fn onlret(&self) -> bool {
        self.predicates.onlret
    }

    /// TABDLY is set to XTABS (expand tabs to spaces)
    pub fn xtabs(&self) -> bool {
        self.predicates.xtabs
    }

    // Local predicates

    pub fn isig(&self) -> bool {
        self.predicates.isig
    }

    /// Canonical (line-buffered) input
    pub fn icanon(&self) -> bool {
        self.predicates.icanon
    }

    pub fn echo(&self) -> bool {
        self.predicates.echo
    }

    pub fn echoe(&self) -> bool {
        self.predicates.echoe
    }

    pub fn echok(&self) -> bool {
        self.predicates.echok
    }

    pub fn echonl(&self) -> bool {
        self.predicates.echonl
    }

    pub fn noflsh(&self) -> bool {
        self.predicates.noflsh
    }

    pub fn echoctl(&self) -> bool {
        self.predicates.echoctl
    }

    pub fn echoprt(&self) -> bool {
        self.predicates.echoprt
    }

    pub fn echoke(&self) -> bool {
        self.predicates.echoke
    }

    pub fn iexten(&self) -> bool {
        self.predicates.iexten
    }

    // Control characters

    pub fn intr_char(&self) -> u8 {
        self.cc[VINTR]
    }

    pub fn quit_char(&self) -> u8 {
        self.cc[VQUIT]
    }

    pub fn erase_char(&self) -> u8 {
        self.cc[VERASE]
    }

    pub fn kill_char(&self) -> u8 {
        self.cc[VKILL]
    }

    pub fn eof_char(&self) -> u8 {
        self.cc[VEOF]
    }

    pub fn start_char(&self) -> u8 {
        self.cc[VSTART]
    }

    pub fn stop_char(&self) -> u8 {
        self.cc[VSTOP]
    }

    pub fn susp_char(&self) -> u8 {
        self.cc[VSUSP]
    }

    pub fn eol_char(&self) -> u8 {
        self.cc[VEOL]
    }

    pub fn eol2_char(&self) -> u8 {
        self.cc[VEOL2]
    }

    pub fn reprint_char(&self) -> u8 {
        self.cc[VREPRINT]
    }

    pub fn werase_char(&self) -> u8 {
        self.cc[VWERASE]
    }

    pub fn lnext_char(&self) -> u8 {
        self.cc[VLNEXT]
    }
}
