//! Interactive operator console for the Drover control executable.
//!
//! Reads command lines, parses them into telecommands, and sends them to
//! the control executable's telecommand server, printing the response.
//! Run with the telecommand endpoint as the only argument, or use the
//! default.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use color_eyre::{eyre::WrapErr, Result};
use comms_if::{
    net::zmq,
    tc::{Tc, TcResponse},
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use structopt::StructOpt;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

const PROMPT: &str = "Drover $ ";

const DEFAULT_TC_ENDPOINT: &str = "tcp://localhost:5530";

/// Maximum time to wait for a response before assuming the exec is down.
const RESPONSE_TIMEOUT_MS: i32 = 2000;

// ---------------------------------------------------------------------------
// MAIN
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let endpoint = std::env::args()
        .nth(1)
        .unwrap_or_else(|| String::from(DEFAULT_TC_ENDPOINT));

    // Connect the telecommand socket
    let ctx = zmq::Context::new();
    let socket = ctx
        .socket(zmq::REQ)
        .wrap_err("Couldn't create the telecommand socket")?;
    socket
        .set_rcvtimeo(RESPONSE_TIMEOUT_MS)
        .wrap_err("Couldn't set the response timeout")?;
    socket
        .set_req_relaxed(true)
        .wrap_err("Couldn't set the request options")?;
    socket
        .connect(&endpoint)
        .wrap_err_with(|| format!("Couldn't connect to {}", endpoint))?;

    println!("Connected to {} (type \"help\" for commands)", endpoint);

    let mut rl = DefaultEditor::new()?;

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                println!("Unhandled error: {:?}", e);
                break;
            }
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        rl.add_history_entry(trimmed).ok();

        if trimmed == "help" {
            print_help();
            continue;
        }

        // Parse the line into a telecommand; structopt expects a program
        // name first
        let words = std::iter::once("tc").chain(trimmed.split_whitespace());
        let tc = match Tc::from_iter_safe(words) {
            Ok(tc) => tc,
            Err(e) => {
                println!("{}", e.message);
                continue;
            }
        };

        // Send it and report the response
        if let Err(e) = socket.send(&tc.to_json(), 0) {
            println!("Send failed: {}", e);
            continue;
        }

        match socket.recv_string(0) {
            Ok(Ok(json)) => match serde_json::from_str::<TcResponse>(&json) {
                Ok(TcResponse::Ok) => println!("ok"),
                Ok(TcResponse::Invalid(msg)) => println!("rejected: {}", msg),
                Ok(TcResponse::CannotProcess(msg)) => println!("cannot process: {}", msg),
                Err(e) => println!("Unreadable response: {}", e),
            },
            Ok(Err(_)) => println!("Non-UTF8 response"),
            Err(zmq::Error::EAGAIN) => println!("No response, is ctrl_exec running?"),
            Err(e) => println!("Receive failed: {}", e),
        }
    }

    println!("Exiting...");
    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn print_help() {
    println!("Telecommands:");
    println!("  drive <left> <right>                open-loop throttles in [-1, 1]");
    println!("  rotate <degrees>                    rotate in place");
    println!("  drive-forward <meters>              drive along the current heading");
    println!("  drive-to <x> <z>                    navigate to a position");
    println!("  stop                                stop and clear targets");
    println!("  set-pid-gains <loop> <kp> <ki> <kd> loop is orientation|position");
    println!("  set-max-throttle <value>");
    println!("  set-position-goal-tolerance <m>");
    println!("  watchdog <enabled> <timeout_s>");
    println!("  pwm-frequency <hz>");
    println!("  save-map");
    println!("  ping");
}
