use std::cell::RefCell;
use std::rc::Rc;

use nix::sys::signal::Signal;

use super::*;
use crate::event::Subscription;
use crate::termios::*;

/// Line discipline with every output edge recorded
struct Harness {
    ldisc: LineDiscipline,
    lower: Rc<RefCell<Vec<u8>>>,
    upper: Rc<RefCell<Vec<u8>>>,
    signals: Rc<RefCell<Vec<Signal>>>,
    _subs: Vec<Subscription>,
}

impl Harness {
    fn new() -> Self {
        let ldisc = LineDiscipline::new();
        let lower = Rc::new(RefCell::new(Vec::new()));
        let upper = Rc::new(RefCell::new(Vec::new()));
        let signals = Rc::new(RefCell::new(Vec::new()));

        let l = Rc::clone(&lower);
        let u = Rc::clone(&upper);
        let s = Rc::clone(&signals);
        let subs = vec![
            ldisc.on_write_to_lower(move |buf| l.borrow_mut().extend_from_slice(buf)),
            ldisc.on_write_to_upper(move |buf| u.borrow_mut().extend_from_slice(buf)),
            ldisc.on_signal(move |sig| s.borrow_mut().push(*sig)),
        ];

        Self {
            ldisc,
            lower,
            upper,
            signals,
            _subs: subs,
        }
    }

    fn set(&mut self, iflag: u32, oflag: u32, lflag: u32) -> &mut Self {
        self.update(|t| t.with_flags(t.iflag() | iflag, t.oflag() | oflag, t.cflag(), t.lflag() | lflag))
    }

    fn reset(&mut self, iflag: u32, oflag: u32, lflag: u32) -> &mut Self {
        self.update(|t| {
            t.with_flags(t.iflag() & !iflag, t.oflag() & !oflag, t.cflag(), t.lflag() & !lflag)
        })
    }

    fn update(&mut self, f: impl FnOnce(&Termios) -> Termios) -> &mut Self {
        let next = f(self.ldisc.termios());
        self.ldisc.set_termios(next);
        self
    }

    fn input(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        self.ldisc.write_from_lower(bytes);
        self
    }

    fn output(&mut self, bytes: impl AsRef<[u8]>) -> &mut Self {
        self.ldisc
            .write_from_upper(bytes)
            .expect("flow should be active");
        self
    }

    fn expect(&self, lower: impl AsRef<[u8]>, upper: impl AsRef<[u8]>) {
        assert_eq!(
            String::from_utf8_lossy(&self.lower.borrow()),
            String::from_utf8_lossy(lower.as_ref()),
            "device bytes"
        );
        assert_eq!(
            String::from_utf8_lossy(&self.upper.borrow()),
            String::from_utf8_lossy(upper.as_ref()),
            "consumer bytes"
        );
    }
}

fn check(lower: &str, upper: &str, input: &str) {
    let mut h = Harness::new();
    h.input(input);
    h.expect(lower, upper);
    assert!(h.signals.borrow().is_empty());
}

#[test]
fn test_input_normal_characters() {
    check("foo\r\n", "foo\n", "foo\r");
    // "bar" stays in the pending line
    check("foo\r\nbar", "foo\n", "foo\rbar");
}

#[test]
fn test_input_control_characters() {
    check("foo^Hbar\r\n", "foo\x08bar\n", "foo\x08bar\r");
}

#[test]
fn test_input_newline() {
    check("foo\r\n", "foo\n", "foo\n");
}

#[test]
fn test_input_newline_under_inlcr() {
    let mut h = Harness::new();
    h.set(INLCR, 0, 0).input("foo\nbar\r");
    h.expect("foo^Mbar\r\n", "foo\rbar\n");
}

#[test]
fn test_input_newline_without_onlcr() {
    let mut h = Harness::new();
    h.reset(0, ONLCR, 0).input("foo\nbar");
    h.expect("foo\nbar", "foo\n");
}

#[test]
fn test_input_newline_without_icanon() {
    let mut h = Harness::new();
    h.reset(0, 0, ICANON).input("foo\nbar");
    h.expect("foo\r\nbar", "foo\nbar");
}

#[test]
fn test_input_newline_under_onlret_without_onlcr() {
    let mut h = Harness::new();
    h.set(0, ONLRET, 0)
        .reset(0, ONLCR, 0)
        .input("foo\nbar\t\x7f");
    h.expect("foo\nbar\t\x08\x08\x08\x08\x08", "foo\n");
}

#[test]
fn test_input_carriage_return_under_igncr() {
    let mut h = Harness::new();
    h.set(IGNCR, 0, 0).input("foo\rbar\n");
    h.expect("foobar\r\n", "foobar\n");
}

#[test]
fn test_input_utf8() {
    check("α\r\n", "α\n", "α\r");
    check("あ\r\n", "あ\n", "あ\r");
    check("𠮷\r\n", "𠮷\n", "𠮷\r");
}

#[test]
fn test_input_broken_utf8() {
    let mut h = Harness::new();
    h.input([0x80, CR]);
    assert_eq!(*h.lower.borrow(), vec![0x80, CR, NL]);
    assert_eq!(*h.upper.borrow(), vec![0x80, NL]);
}

#[test]
fn test_input_eight_bit_under_istrip() {
    let mut h = Harness::new();
    h.set(ISTRIP, 0, 0).input([0xc1, 0xc2, 0xc3, CR]);
    h.expect("ABC\r\n", "ABC\n");
}

#[test]
fn test_input_tab() {
    check("foo\tbar\r\n", "foo\tbar\n", "foo\tbar\r");
}

#[test]
fn test_input_tab_under_xtabs() {
    let mut h = Harness::new();
    h.set(0, XTABS, 0).input("foo\tbar\r");
    h.expect("foo     bar\r\n", "foo\tbar\n");
}

#[test]
fn test_input_under_iuclc() {
    let mut h = Harness::new();
    h.set(IUCLC, 0, 0).input("FooBar\r");
    h.expect("foobar\r\n", "foobar\n");
}

#[test]
fn test_input_under_iuclc_and_olcuc() {
    let mut h = Harness::new();
    h.set(IUCLC, OLCUC, 0).input("FooBar\r");
    h.expect("FOOBAR\r\n", "foobar\n");
}

#[test]
fn test_erase() {
    check("foo\x08 \x08bar\x08 \x08\r\n", "foba\n", "foo\x7fbar\x7f\r");
}

#[test]
fn test_erase_after_tab() {
    check(
        "foo\tbar\x08 \x08\x08 \x08\x08 \x08\x08\x08\x08\x08\x08\x08 \x08qux\r\n",
        "foqux\n",
        "foo\tbar\x7f\x7f\x7f\x7f\x7fqux\r",
    );
    check("foo\t\x08\x08\x08\x08\x08bar\r\n", "foobar\n", "foo\t\x7fbar\r");

    // the line starts at the column left by earlier output
    let mut h = Harness::new();
    h.output("foo").input("\t\x7fx\r");
    h.expect("foo\t\x08\x08\x08\x08\x08x\r\n", "x\n");
}

#[test]
fn test_erase_after_utf8() {
    check("ABαCα\x08 \x08\x08 \x08\r\n", "ABα\n", "ABαCα\x7f\x7f\r");
}

#[test]
fn test_erase_after_broken_utf8() {
    let mut h = Harness::new();
    h.input([0x80, 0x7f, CR]);
    assert_eq!(*h.lower.borrow(), vec![0x80, CR, NL]);
    assert_eq!(*h.upper.borrow(), vec![0x80, NL]);
}

#[test]
fn test_erase_tab_after_eof() {
    check("ABCDEF\t\x08\x08\x08 \x08\r\n", "ABCDE\n", "ABC\x04DEF\t\x7f\x7f\r");
    check(
        "ABCδεF\t\x08\x08\x08 \x08\x08 \x08\x08 \x08\r\n",
        "ABC\n",
        "ABC\x04δεF\t\x7f\x7f\x7f\x7f\r",
    );
    check(
        "ABCDEF\tGHI\t\x08\x08\x08\x08\x08\x08 \x08\r\n",
        "ABCDEF\tGH\n",
        "ABC\x04DEF\tGHI\t\x7f\x7f\r",
    );
    check("ABCD^H\t\x08\x08\x08 \x08\x08 \x08\r\n", "ABCD\n", "ABC\x04D\x08\t\x7f\x7f\r");
}

#[test]
fn test_erase_control_character() {
    check("foo^H\x08 \x08\x08 \x08bar\r\n", "foobar\n", "foo\x08\x7fbar\r");
}

#[test]
fn test_erase_under_echoprt() {
    let mut h = Harness::new();
    h.set(0, 0, ECHOPRT).input("foo\x7fbar\r");
    h.expect("foo\\o/bar\r\n", "fobar\n");

    let mut h = Harness::new();
    h.set(0, 0, ECHOPRT).input("ABC\x7f\r\x7fDEF\r");
    h.expect("ABC\\C\r\n/DEF\r\n", "AB\nDEF\n");

    let mut h = Harness::new();
    h.set(0, 0, ECHOPRT).input("ABαCβ\x7f\x7fZ\r");
    h.expect("ABαCβ\\βC/Z\r\n", "ABαZ\n");

    let mut h = Harness::new();
    h.set(0, XTABS, ECHOPRT).input("α\x7f\tA");
    h.expect("α\\α/    A", "");
}

#[test]
fn test_erase_without_echoe() {
    let mut h = Harness::new();
    h.reset(0, 0, ECHOE).input("foo\x7fbar\r");
    h.expect("foo^?bar\r\n", "fobar\n");
}

#[test]
fn test_word_erase() {
    check(
        "foo bar\x08 \x08\x08 \x08\x08 \x08baz qux\x08 \x08\x08 \x08\x08 \x08corge\r\n",
        "foo baz corge\n",
        "foo bar\x17baz qux\x17corge\r",
    );
    check("foo  \x08 \x08\x08 \x08\x08 \x08\x08 \x08\x08 \x08", "", "foo  \x17");
    check("   \x08 \x08\x08 \x08\x08 \x08", "", "   \x17");
    check("@foo\x08 \x08\x08 \x08\x08 \x08", "", "@foo\x17");
}

#[test]
fn test_kill() {
    check("foo\x08 \x08\x08 \x08\x08 \x08bar\r\n", "bar\n", "foo\x15bar\r");
}

#[test]
fn test_kill_without_echo() {
    let mut h = Harness::new();
    h.reset(0, 0, ECHO).input("foo\x15bar\r");
    h.expect("", "bar\n");
}

#[test]
fn test_kill_without_echoke() {
    let mut h = Harness::new();
    h.reset(0, 0, ECHOKE).input("foo\x15bar\r");
    h.expect("foo^U\r\nbar\r\n", "bar\n");
}

#[test]
fn test_kill_without_echok_and_echoke() {
    let mut h = Harness::new();
    h.reset(0, 0, ECHOKE | ECHOK).input("foo\x15bar\r");
    h.expect("foo^Ubar\r\n", "bar\n");
}

#[test]
fn test_eof_flushes_partial_line() {
    check("foobar", "foo", "foo\x04bar");
    check("foobar\x08 \x08\x08 \x08\x08 \x08qux\r\n", "fooqux\n", "foo\x04bar\x15qux\r");
}

#[test]
fn test_eof_on_empty_line_delivers_empty_chunk() {
    let ldisc = RefCell::new(LineDiscipline::new());
    let chunks = Rc::new(RefCell::new(Vec::<Vec<u8>>::new()));
    let c = Rc::clone(&chunks);
    let _sub = ldisc
        .borrow()
        .on_write_to_upper(move |buf| c.borrow_mut().push(buf.to_vec()));

    ldisc.borrow_mut().write_from_lower("\x04");
    assert_eq!(*chunks.borrow(), vec![Vec::<u8>::new()]);
}

#[test]
fn test_eol() {
    let mut h = Harness::new();
    h.update(|t| t.with_cc(VEOL, 0x01)).input("foo\x01bar");
    h.expect("foo^Abar", "foo\x01");
}

#[test]
fn test_literal_next() {
    check("foo^\x08^?bar\r\n", "foo\x7fbar\n", "foo\x16\x7fbar\r");
}

#[test]
fn test_reprint() {
    check(
        "foo\x08 \x08bar^R\r\nfobar\x08 \x08qux\r\n",
        "fobaqux\n",
        "foo\x7fbar\x12\x7fqux\r",
    );
}

#[test]
fn test_signals_discard_pending_line() {
    for (key, echo, signal) in [
        ("\x03", "^C", Signal::SIGINT),
        ("\x1c", "^\\", Signal::SIGQUIT),
        ("\x1a", "^Z", Signal::SIGTSTP),
    ] {
        let mut h = Harness::new();
        h.input(format!("foo{key}bar\n"));
        h.expect(format!("foo{echo}bar\r\n"), "bar\n");
        assert_eq!(*h.signals.borrow(), vec![signal]);
    }
}

#[test]
fn test_signal_under_noflsh_keeps_line() {
    let mut h = Harness::new();
    h.set(0, 0, NOFLSH).input("foo\x03bar\n");
    h.expect("foo^Cbar\r\n", "foobar\n");
    assert_eq!(*h.signals.borrow(), vec![Signal::SIGINT]);
}

#[test]
fn test_signal_discards_held_echo() {
    let mut h = Harness::new();
    h.input("foo\x13bar\x03");
    assert!(h.ldisc.flow());
    h.expect("foo^C", "");

    h.input("baz\r");
    h.expect("foo^Cbaz\r\n", "baz\n");
}

#[test]
fn test_signal_under_noflsh_releases_held_echo() {
    let mut h = Harness::new();
    h.set(0, 0, NOFLSH).input("foo\x13bar\x03");
    assert!(h.ldisc.flow());
    h.expect("foobar^C", "");

    h.input("\r");
    h.expect("foobar^C\r\n", "foobar\n");
}

#[test]
fn test_signal_ignored_without_isig() {
    let mut h = Harness::new();
    h.reset(0, 0, ISIG).input("foo\x03\n");
    h.expect("foo^C\r\n", "foo\x03\n");
    assert!(h.signals.borrow().is_empty());
}

#[test]
fn test_stop_rejects_upper_writes() {
    let mut h = Harness::new();
    h.input("foo\x13bar");
    h.expect("foo", "");
    assert!(!h.ldisc.flow());
    assert_eq!(h.ldisc.write_from_upper("foo"), Err(LdiscError::FlowStopped));
}

#[test]
fn test_start_flushes_held_echo() {
    let mut h = Harness::new();
    h.input("foo\x13bar");
    assert!(!h.ldisc.flow());
    h.input("\x11baz");
    assert!(h.ldisc.flow());
    h.expect("foobarbaz", "");
}

#[test]
fn test_flow_events() {
    let mut h = Harness::new();
    let log = Rc::new(RefCell::new(Vec::new()));
    let on = Rc::clone(&log);
    let off = Rc::clone(&log);
    let _a = h.ldisc.on_flow_activated(move |_| on.borrow_mut().push(true));
    let _b = h.ldisc.on_flow_deactivated(move |_| off.borrow_mut().push(false));

    h.input("\x13\x11");
    assert_eq!(*log.borrow(), vec![false, true]);
}

#[test]
fn test_disabling_ixon_restarts_flow() {
    let mut h = Harness::new();
    h.input("foo\x13bar");
    h.reset(IXON, 0, 0);
    assert!(h.ldisc.flow());
    h.expect("foobar", "");
}

#[test]
fn test_ixany_restarts_flow() {
    let cases: [(&str, &str); 7] = [
        ("foo\x13bar", "foobar"),
        ("foo\x13\x7f", "foo\x08 \x08"),
        ("foo bar\x13\x17", "foo bar\x08 \x08\x08 \x08\x08 \x08"),
        (
            "foo bar\x13\x15",
            "foo bar\x08 \x08\x08 \x08\x08 \x08\x08 \x08\x08 \x08\x08 \x08\x08 \x08",
        ),
        ("foo\x13\x04", "foo"),
        ("foo\x13\x16", "foo^\x08"),
        ("foo\x13\x12", "foo^R\r\nfoo"),
    ];

    for (input, lower) in cases {
        let mut h = Harness::new();
        h.set(IXANY, 0, 0).input(input);
        assert!(h.ldisc.flow(), "input {:?}", input);
        assert_eq!(
            String::from_utf8_lossy(&h.lower.borrow()),
            lower,
            "input {:?}",
            input
        );
    }
}

#[test]
fn test_output_normal_characters() {
    let mut h = Harness::new();
    h.output("foo\n");
    h.expect("foo\r\n", "");
}

#[test]
fn test_output_control_characters() {
    let mut h = Harness::new();
    h.output("foo\x08bar\n");
    h.expect("foo\x08bar\r\n", "");
}

#[test]
fn test_output_utf8() {
    for s in ["α", "あ", "𠮷"] {
        let mut h = Harness::new();
        h.output(format!("{s}\n"));
        h.expect(format!("{s}\r\n"), "");
    }
}

#[test]
fn test_output_broken_utf8() {
    let mut h = Harness::new();
    h.output([0x80, NL]);
    assert_eq!(*h.lower.borrow(), vec![0x80, CR, NL]);
}

#[test]
fn test_output_newlines() {
    let mut h = Harness::new();
    h.output("foo\nbar\n");
    h.expect("foo\r\nbar\r\n", "");
}

#[test]
fn test_output_without_opost() {
    let mut h = Harness::new();
    h.reset(0, OPOST, 0).output("foo\nbar\n");
    h.expect("foo\nbar\n", "");
}

#[test]
fn test_output_carriage_return() {
    let mut h = Harness::new();
    h.output("foo\rbar\n");
    h.expect("foo\rbar\r\n", "");
}

#[test]
fn test_output_under_ocrnl() {
    let mut h = Harness::new();
    h.set(0, OCRNL, 0).output("foo\n\r\r\rbar\r\r\rbaz\n");
    h.expect("foo\r\n\n\n\nbar\n\n\nbaz\r\n", "");
}

#[test]
fn test_output_under_ocrnl_and_onocr() {
    let mut h = Harness::new();
    h.set(0, OCRNL | ONOCR, 0).output("foo\n\r\r\rbar\r\r\rbaz\n");
    h.expect("foo\r\nbar\n\n\nbaz\r\n", "");
}

#[test]
fn test_output_under_ocrnl_onocr_and_onlret() {
    let mut h = Harness::new();
    h.set(0, OCRNL | ONOCR | ONLRET, 0)
        .reset(ICRNL, 0, 0)
        .output("foo\r")
        .input("bar\t\x7f");
    h.expect("foo\nbar\t\x08\x08\x08\x08\x08", "");
}

#[test]
fn test_output_tab() {
    let mut h = Harness::new();
    h.output("foo\tbar\n");
    h.expect("foo\tbar\r\n", "");
}

#[test]
fn test_output_under_olcuc() {
    let mut h = Harness::new();
    h.set(0, OLCUC, 0).output("FooBar\n");
    h.expect("FOOBAR\r\n", "");
}

#[test]
fn test_raw_mode_passthrough() {
    for (input, upper) in [
        ("ABCDE", "ABCDE"),
        ("ABCDE\r", "ABCDE\n"),
        ("ABCDE\x7f", "ABCDE\x7f"),
    ] {
        let mut h = Harness::new();
        h.reset(IXON, 0x0030, 0x804b).input(input);
        h.expect("", upper);
    }
}

#[test]
fn test_raw_termios_passes_bytes_verbatim() {
    let mut h = Harness::new();
    h.update(|_| Termios::raw()).input("a\rb\x03\x7f");
    h.expect("", "a\rb\x03\x7f");
    assert!(h.signals.borrow().is_empty());
}

#[test]
fn test_panicking_listener_does_not_stop_batch() {
    let mut h = Harness::new();
    let _bad = h.ldisc.on_write_to_lower(|_| panic!("renderer went away"));
    h.input("ab\r");
    h.expect("ab\r\n", "ab\n");
}

#[test]
fn test_leaving_canonical_mode_delivers_pending_line() {
    let mut h = Harness::new();
    h.input("abc");
    h.expect("abc", "");
    h.reset(0, 0, ICANON);
    h.expect("abc", "abc");
}
