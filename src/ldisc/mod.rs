//! Line Discipline
//!
//! Glues a device (the lower side, e.g. a terminal widget) to a consumer
//! (the upper side, e.g. a process reading stdin). Input from the device goes
//! through `write_from_lower()`: the discipline applies the termios input
//! translations, handles editing and signal characters, echoes back to the
//! device, and hands finished input to the consumer. Output from the consumer
//! goes through `write_from_upper()` and gets the termios output processing
//! (NL to CR-NL, tab expansion, ...) before reaching the device.
//!
//! ```text
//!                 +-------+
//!                 | Upper |
//!                 +-------+
//!                   |   ^
//!  write_from_upper |   | on_write_to_upper / on_signal
//!                   V   |
//!            +-----------------+
//!            | Line discipline |
//!            +-----------------+
//!                   |   ^
//!  on_write_to_lower|   | write_from_lower
//!                   V   |
//!                 +-------+
//!                 | Lower |
//!                 +-------+
//! ```
//!
//! References:
//! - https://pubs.opengroup.org/onlinepubs/009695299/basedefs/xbd_chap11.html
//! - https://github.com/torvalds/linux/blob/master/drivers/tty/n_tty.c

use nix::sys::signal::Signal;

use crate::event::{EventEmitter, Subscription};
use crate::termios::Termios;

#[cfg(test)]
mod tests;

const BS: u8 = 0x08;
const TAB: u8 = 0x09;
const NL: u8 = 0x0a;
const CR: u8 = 0x0d;
const SP: u8 = 0x20;
const CARET: u8 = b'^';
const ECHOPRT_START: u8 = b'\\';
const ECHOPRT_END: u8 = b'/';

const TAB_WIDTH: usize = 8;

/// Errors reported to the upper side
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LdiscError {
    /// Output was stopped by the stop character; the consumer must wait for
    /// the flow to be reactivated before writing.
    #[error("output is stopped; do not write until flow is reactivated")]
    FlowStopped,
}

/// What a received byte does, per the current control-character table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Normal,
    Eof,
    Eol,
    Erase,
    WordErase,
    Kill,
    Reprint,
    LiteralNext,
    Start,
    Stop,
    Interrupt,
    Quit,
    Suspend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EraseKind {
    Char,
    Word,
    Line,
}

/// Control characters that are not printed as-is by ECHOCTL
fn is_cntrl(c: u8) -> bool {
    c.is_ascii_control() && c != TAB
}

fn is_word_char(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

fn is_utf8_continuation(c: u8) -> bool {
    c & 0xc0 == 0x80
}

/// Build the role of every byte value. Later assignments win, so the order
/// matches the priority n_tty gives overlapping bindings.
fn key_actions(t: &Termios) -> [KeyAction; 256] {
    let mut actions = [KeyAction::Normal; 256];
    let mut bind = |c: u8, action| actions[c as usize] = action;

    if t.icanon() {
        bind(t.eof_char(), KeyAction::Eof);
        bind(t.eol_char(), KeyAction::Eol);
        bind(t.eol2_char(), KeyAction::Eol);
        bind(t.erase_char(), KeyAction::Erase);
        bind(t.kill_char(), KeyAction::Kill);
        if t.iexten() {
            bind(t.reprint_char(), KeyAction::Reprint);
            bind(t.werase_char(), KeyAction::WordErase);
        }
    }
    if t.iexten() {
        bind(t.lnext_char(), KeyAction::LiteralNext);
    }
    if t.ixon() {
        bind(t.start_char(), KeyAction::Start);
        bind(t.stop_char(), KeyAction::Stop);
    }
    if t.isig() {
        bind(t.intr_char(), KeyAction::Interrupt);
        bind(t.quit_char(), KeyAction::Quit);
        bind(t.susp_char(), KeyAction::Suspend);
    }
    // NUL disables a binding
    actions[0] = KeyAction::Normal;
    actions
}

/// N_TTY-style line discipline
pub struct LineDiscipline {
    termios: Termios,
    key_actions: [KeyAction; 256],

    /// False after VSTOP, true after VSTART
    flow: bool,
    /// Cursor column on the device, as far as echo/output can tell
    column: usize,
    /// Column where the pending line started
    base_column: usize,
    /// The next byte is taken literally (after VLNEXT)
    literal_next: bool,
    /// Inside a `\...` ECHOPRT erase sequence
    echoprt: bool,

    /// Flushed at the end of every operation
    to_lower: Vec<u8>,
    /// The pending line; flushed on NL/EOL/EOF in canonical mode
    to_upper: Vec<u8>,

    on_write_to_lower: EventEmitter<[u8]>,
    on_write_to_upper: EventEmitter<[u8]>,
    on_signal: EventEmitter<Signal>,
    on_flow_activated: EventEmitter<()>,
    on_flow_deactivated: EventEmitter<()>,
}

impl Default for LineDiscipline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LineDiscipline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineDiscipline")
            .field("termios", &self.termios)
            .field("flow", &self.flow)
            .field("column", &self.column)
            .field("pending", &self.to_upper.len())
            .finish()
    }
}

impl LineDiscipline {
    /// Create a line discipline with the default termios
    pub fn new() -> Self {
        Self::with_termios(Termios::default())
    }

    /// Create a line discipline with custom termios
    pub fn with_termios(termios: Termios) -> Self {
        Self {
            key_actions: key_actions(&termios),
            termios,
            flow: true,
            column: 0,
            base_column: 0,
            literal_next: false,
            echoprt: false,
            to_lower: Vec::new(),
            to_upper: Vec::new(),
            on_write_to_lower: EventEmitter::new(),
            on_write_to_upper: EventEmitter::new(),
            on_signal: EventEmitter::new(),
            on_flow_activated: EventEmitter::new(),
            on_flow_deactivated: EventEmitter::new(),
        }
    }

    /// Bytes for the device: echo and processed output
    pub fn on_write_to_lower(&self, listener: impl Fn(&[u8]) + 'static) -> Subscription {
        self.on_write_to_lower.subscribe(listener)
    }

    /// Bytes for the consumer. An empty chunk means end-of-file.
    pub fn on_write_to_upper(&self, listener: impl Fn(&[u8]) + 'static) -> Subscription {
        self.on_write_to_upper.subscribe(listener)
    }

    /// Signals generated by INTR, QUIT and SUSP
    pub fn on_signal(&self, listener: impl Fn(&Signal) + 'static) -> Subscription {
        self.on_signal.subscribe(listener)
    }

    pub fn on_flow_activated(&self, listener: impl Fn(&()) + 'static) -> Subscription {
        self.on_flow_activated.subscribe(listener)
    }

    pub fn on_flow_deactivated(&self, listener: impl Fn(&()) + 'static) -> Subscription {
        self.on_flow_deactivated.subscribe(listener)
    }

    /// Whether the consumer may write
    pub fn flow(&self) -> bool {
        self.flow
    }

    pub fn termios(&self) -> &Termios {
        &self.termios
    }

    /// Replace the termios snapshot
    ///
    /// Leaving canonical mode hands the pending line to the consumer as is.
    pub fn set_termios(&mut self, termios: Termios) {
        let leaving_canonical = self.termios.icanon() && !termios.icanon();
        self.key_actions = key_actions(&termios);
        self.termios = termios;

        if leaving_canonical {
            self.flush_to_upper();
        }

        if !self.termios.ixon() {
            self.activate_flow();
            self.flush_to_lower();
        }
    }

    fn activate_flow(&mut self) {
        self.flow = true;
        self.on_flow_activated.fire(&());
    }

    fn deactivate_flow(&mut self) {
        self.flow = false;
        self.on_flow_deactivated.fire(&());
    }

    fn flush_to_lower(&mut self) {
        if !self.flow || self.to_lower.is_empty() {
            return;
        }
        self.on_write_to_lower.fire(&self.to_lower);
        self.to_lower.clear();
    }

    fn update_base_column(&mut self) {
        if self.to_upper.is_empty() {
            self.base_column = self.column;
        }
    }

    fn clear_to_upper(&mut self) {
        self.to_upper.clear();
        self.update_base_column();
    }

    fn flush_to_upper(&mut self) {
        if !self.to_upper.is_empty() {
            self.on_write_to_upper.fire(&self.to_upper);
        }
        self.clear_to_upper();
    }

    /// Flush the pending line even when it is empty; an empty chunk tells
    /// the consumer that end-of-file was typed at the start of a line.
    fn flush_eof(&mut self) {
        self.on_write_to_upper.fire(&self.to_upper);
        self.clear_to_upper();
    }

    fn output_postprocessed(&mut self, c: u8) {
        let t = &self.termios;
        if !t.opost() {
            self.to_lower.push(c);
            return;
        }

        match c {
            BS => {
                self.column = self.column.saturating_sub(1);
                self.to_lower.push(BS);
            },
            TAB => {
                let spaces = TAB_WIDTH - self.column % TAB_WIDTH;
                self.column += spaces;
                if t.xtabs() {
                    self.to_lower.extend(std::iter::repeat(SP).take(spaces));
                } else {
                    self.to_lower.push(TAB);
                }
            },
            NL => {
                if t.onlcr() {
                    self.column = 0;
                    self.base_column = 0;
                    self.to_lower.extend_from_slice(&[CR, NL]);
                } else if t.onlret() {
                    self.column = 0;
                    self.to_lower.push(NL);
                } else {
                    self.base_column = self.column;
                    self.to_lower.push(NL);
                }
            },
            CR => {
                if t.onocr() && self.column == 0 {
                    // nothing printed
                } else if t.ocrnl() {
                    if t.onlret() {
                        self.column = 0;
                        self.base_column = 0;
                    }
                    self.to_lower.push(NL);
                } else {
                    self.column = 0;
                    self.base_column = 0;
                    self.to_lower.push(CR);
                }
            },
            _ => {
                if !(t.iutf8() && is_utf8_continuation(c)) {
                    self.column += 1;
                }
                self.to_lower
                    .push(if t.olcuc() { c.to_ascii_uppercase() } else { c });
            },
        }
    }

    /// Echo bytes to the device. Unless `raw`, control characters are shown
    /// as `^X` under ECHOCTL.
    fn echo(&mut self, bytes: &[u8], raw: bool) {
        for &c in bytes {
            if !raw && self.termios.echoctl() && is_cntrl(c) {
                self.to_lower.extend_from_slice(&[CARET, c ^ 0x40]);
                self.column += 2;
            } else {
                self.output_postprocessed(c);
            }
        }
    }

    fn input_preprocessed(&mut self, c: u8) {
        let mut c = c;
        if c == CR {
            if self.termios.igncr() {
                return;
            }
            if self.termios.icrnl() {
                c = NL;
            }
        } else if c == NL && self.termios.inlcr() {
            c = CR;
        }

        if self.termios.icanon() && c == NL {
            if self.termios.echo() || self.termios.echonl() {
                self.echo(&[NL], true);
                self.flush_to_lower();
            }
            self.to_upper.push(NL);
            self.flush_to_upper();
        } else if self.termios.echo() {
            self.finish_echoprt();
            self.update_base_column();
            self.echo(&[c], c == NL);
            self.flush_to_lower();
            self.to_upper.push(c);
        } else {
            self.to_upper.push(c);
        }
        // write_from_lower flushes the pending bytes in non-canonical mode
    }

    fn erase(&mut self, kind: EraseKind) {
        if self.to_upper.is_empty() {
            return;
        }

        if kind == EraseKind::Line {
            if !self.termios.echo() {
                self.clear_to_upper();
                return;
            }
            if !self.termios.echok() || !self.termios.echoke() || !self.termios.echoe() {
                self.clear_to_upper();
                self.finish_echoprt();
                let kill = self.termios.kill_char();
                self.echo(&[kill], false);
                if self.termios.echok() {
                    self.echo(&[NL], true);
                }
                return;
            }
        }

        let mut word_found = false;
        let mut idx = self.to_upper.len();
        while idx > 0 {
            idx -= 1;
            let c = self.to_upper[idx];
            if self.termios.iutf8() && is_utf8_continuation(c) {
                continue;
            }

            if kind == EraseKind::Word {
                if is_word_char(c) {
                    word_found = true;
                } else if word_found {
                    break;
                }
            }

            let removed = self.to_upper.split_off(idx);
            if self.termios.echo() {
                if self.termios.echoprt() {
                    self.start_echoprt();
                    self.echo(&removed, false);
                } else if kind == EraseKind::Char && !self.termios.echoe() {
                    let erase = self.termios.erase_char();
                    self.echo(&[erase], false);
                } else if c == TAB {
                    let width = self.erased_tab_width();
                    self.to_lower.extend(std::iter::repeat(BS).take(width));
                    self.column = self.column.saturating_sub(width);
                } else {
                    let echoctl = self.termios.echoctl();
                    if is_cntrl(c) && echoctl {
                        // the '^' of the ^X form
                        self.echo(&[BS, SP, BS], true);
                    }
                    if !is_cntrl(c) || echoctl {
                        self.echo(&[BS, SP, BS], true);
                    }
                }
            }

            if kind == EraseKind::Char {
                break;
            }
        }

        if self.to_upper.is_empty() {
            self.clear_to_upper();
            if self.termios.echo() {
                self.finish_echoprt();
            }
        }
    }

    /// Columns a just-erased tab occupied, found by rescanning the rest of
    /// the line back to the previous tab stop
    fn erased_tab_width(&self) -> usize {
        let mut count = 0;
        let mut tab_found = false;

        for &c in self.to_upper.iter().rev() {
            if c == TAB {
                tab_found = true;
                break;
            } else if is_cntrl(c) {
                if self.termios.echoctl() {
                    count += 2;
                }
            } else if self.termios.iutf8() && is_utf8_continuation(c) {
                // shares the column of its lead byte
            } else {
                count += 1;
            }
        }
        if !tab_found {
            count += self.base_column;
        }

        TAB_WIDTH - count % TAB_WIDTH
    }

    fn start_echoprt(&mut self) {
        if !self.echoprt {
            self.echo(&[ECHOPRT_START], true);
            self.echoprt = true;
        }
    }

    fn finish_echoprt(&mut self) {
        if self.echoprt {
            self.echo(&[ECHOPRT_END], true);
            self.echoprt = false;
        }
    }

    fn signal(&mut self, signal: Signal, c: u8) {
        tracing::debug!(?signal, "line discipline raised signal");
        self.on_signal.fire(&signal);
        if !self.termios.noflsh() {
            self.to_lower.clear();
            self.clear_to_upper();
        }
        if self.termios.ixon() {
            self.activate_flow();
        }
        if self.termios.echo() {
            self.echo(&[c], false);
        }
        self.flush_to_lower();
    }

    /// IXANY: any key restarts stopped output
    fn check_start_flow(&mut self) {
        if !self.flow && self.termios.ixon() && self.termios.ixany() {
            self.activate_flow();
            self.flush_to_lower();
        }
    }

    fn next_literal(&mut self) {
        self.literal_next = true;
        if self.termios.echo() {
            self.finish_echoprt();
            if self.termios.echoctl() {
                // the next echoed character overwrites the '^'
                self.echo(&[CARET, BS], true);
                self.flush_to_lower();
            }
        }
    }

    fn reprint(&mut self) {
        self.finish_echoprt();
        let reprint = self.termios.reprint_char();
        self.echo(&[reprint], false);
        self.echo(&[NL], true);
        let line = self.to_upper.clone();
        self.echo(&line, false);
    }

    /// Feed input from the device
    pub fn write_from_lower(&mut self, input: impl AsRef<[u8]>) {
        let input = input.as_ref();
        tracing::trace!(len = input.len(), "input from lower");

        for &byte in input {
            let mut c = byte;
            if self.termios.istrip() {
                c &= 0x7f;
            }
            if self.termios.iuclc() && self.termios.iexten() {
                c = c.to_ascii_lowercase();
            }

            let action = if self.literal_next {
                KeyAction::Normal
            } else {
                self.key_actions[c as usize]
            };
            self.literal_next = false;

            match action {
                KeyAction::Normal => {
                    self.check_start_flow();
                    self.input_preprocessed(c);
                },
                KeyAction::Erase | KeyAction::WordErase | KeyAction::Kill => {
                    self.check_start_flow();
                    self.erase(match action {
                        KeyAction::Erase => EraseKind::Char,
                        KeyAction::WordErase => EraseKind::Word,
                        _ => EraseKind::Line,
                    });
                    self.flush_to_lower();
                },
                KeyAction::Eof => {
                    self.check_start_flow();
                    if self.to_upper.is_empty() {
                        self.flush_eof();
                    } else {
                        self.flush_to_upper();
                    }
                },
                KeyAction::Eol => {
                    self.check_start_flow();
                    if self.termios.echo() {
                        self.echo(&[c], false);
                        self.flush_to_lower();
                    }
                    self.to_upper.push(c);
                    self.flush_to_upper();
                },
                KeyAction::LiteralNext => {
                    self.check_start_flow();
                    self.next_literal();
                },
                KeyAction::Reprint => {
                    self.check_start_flow();
                    self.reprint();
                    self.flush_to_lower();
                },
                KeyAction::Start => {
                    self.activate_flow();
                    self.flush_to_lower();
                },
                KeyAction::Stop => self.deactivate_flow(),
                KeyAction::Interrupt => self.signal(Signal::SIGINT, c),
                KeyAction::Quit => self.signal(Signal::SIGQUIT, c),
                KeyAction::Suspend => self.signal(Signal::SIGTSTP, c),
            }
        }

        if !self.termios.icanon() {
            self.flush_to_upper();
        }
    }

    /// Feed output from the consumer
    ///
    /// Fails with [`LdiscError::FlowStopped`] while output is stopped.
    pub fn write_from_upper(&mut self, output: impl AsRef<[u8]>) -> Result<(), LdiscError> {
        if !self.flow {
            return Err(LdiscError::FlowStopped);
        }

        let output = output.as_ref();
        tracing::trace!(len = output.len(), "output from upper");
        for &c in output {
            self.output_postprocessed(c);
        }
        self.flush_to_lower();
        Ok(())
    }
}
