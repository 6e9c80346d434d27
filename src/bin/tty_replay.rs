//! Replay keystrokes through a line discipline
//!
//! Feeds input (from a file or stdin) to the master side of a pty pair and
//! prints, as JSON, what the renderer would show, what the consumer would
//! read, and which signals were raised.

use std::cell::RefCell;
use std::io::{self, Read};
use std::process::ExitCode;
use std::rc::Rc;

use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tty_bridge::pty::openpty_with;
use tty_bridge::termios::{Termios, ECHO};
use tty_bridge::Config;

#[derive(Serialize)]
struct Replay {
    lower: String,
    upper: String,
    signals: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut input_file: Option<String> = None;
    let mut raw = false;
    let mut echo = true;
    let mut show_help = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-i" | "--input" => {
                i += 1;
                if i < args.len() {
                    input_file = Some(args[i].clone());
                }
            },
            "--raw" => raw = true,
            "--echo-off" => echo = false,
            "-h" | "--help" => show_help = true,
            _ => {
                if input_file.is_none() && !args[i].starts_with('-') {
                    input_file = Some(args[i].clone());
                }
            },
        }
        i += 1;
    }

    if show_help {
        print_help();
        return ExitCode::SUCCESS;
    }

    let input = match &input_file {
        Some(path) => match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                eprintln!("Error reading file '{}': {}", path, e);
                return ExitCode::FAILURE;
            },
        },
        None => {
            let mut data = Vec::new();
            if let Err(e) = io::stdin().read_to_end(&mut data) {
                eprintln!("Error reading stdin: {}", e);
                return ExitCode::FAILURE;
            }
            data
        },
    };

    let config = Config::load_or_default();
    let (master, slave) = openpty_with(&config.pty);

    let mut termios = if raw { Termios::raw() } else { Termios::default() };
    if !echo {
        termios = termios.with_flags(
            termios.iflag(),
            termios.oflag(),
            termios.cflag(),
            termios.lflag() & !ECHO,
        );
    }
    slave.tcsetattr(termios);

    let lower = Rc::new(RefCell::new(Vec::new()));
    let signals = Rc::new(RefCell::new(Vec::new()));

    let l = Rc::clone(&lower);
    let _output = master.on_output(move |chunk| {
        l.borrow_mut().extend_from_slice(&chunk.data);
        chunk.ack.done();
    });
    let s = Rc::clone(&signals);
    let _signals = slave.on_signal(move |sig| s.borrow_mut().push(sig.as_str().to_string()));

    master.input(&input);

    let mut upper = Vec::new();
    while slave.readable() {
        upper.extend(slave.read(None));
    }

    let replay = Replay {
        lower: String::from_utf8_lossy(&lower.borrow()).into_owned(),
        upper: String::from_utf8_lossy(&upper).into_owned(),
        signals: signals.borrow().clone(),
    };
    match serde_json::to_string_pretty(&replay) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        },
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            ExitCode::FAILURE
        },
    }
}

fn print_help() {
    println!(
        r#"tty-replay - replay keystrokes through a line discipline

USAGE:
    tty-replay [OPTIONS] [FILE]

OPTIONS:
    -i, --input <FILE>   Read keystrokes from FILE (default: stdin)
        --raw            Start in raw mode
        --echo-off       Start with ECHO cleared
    -h, --help           Show this help message

ENVIRONMENT:
    TTY_BRIDGE_CONFIG    Config file (default: ~/.config/tty-bridge/config.json)
    RUST_LOG             Log filter (default: warn)

OUTPUT:
    JSON with the bytes sent to the renderer ("lower"), the bytes the
    consumer read ("upper") and the signals raised.

EXAMPLES:
    printf 'foo\x7f\r' | tty-replay
    tty-replay --raw keys.bin"#
    );
}
