//! Simbly interactive shell
//!
//! Starts the worker pool and reads commands from the terminal: `run` a
//! program from a source file with optional integer arguments, `kill` one
//! by id, `list` what each worker is doing, `help`, and `exit`.

use clap::Parser;
use rustyline::error::ReadlineError;
use simbly_core::diag;
use simbly_runtime::{Runtime, default_worker_count};
use tracing::info;

mod commands;

#[derive(Parser)]
#[command(name = "simbly")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Simbly interpreter - run concurrent Simbly programs", long_about = None)]
struct Cli {
    /// Worker threads (default: SIMBLY_WORKERS, or one per CPU with a
    /// floor of four)
    #[arg(short, long)]
    workers: Option<usize>,
}

/// Read the worker count from `SIMBLY_WORKERS`. Invalid values warn and
/// fall back to the built-in default.
fn workers_from_env() -> Option<usize> {
    let val = std::env::var("SIMBLY_WORKERS").ok()?;
    match val.parse::<usize>() {
        Ok(0) => {
            eprintln!("Warning: SIMBLY_WORKERS=0 is invalid, using default");
            None
        }
        Ok(n) => Some(n),
        Err(_) => {
            eprintln!("Warning: SIMBLY_WORKERS='{val}' is not a valid number, using default");
            None
        }
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let workers = cli
        .workers
        .or_else(workers_from_env)
        .unwrap_or_else(default_worker_count);
    let mut runtime = Runtime::new(workers);

    println!("{}", commands::banner("Welcome to the Simbly interpreter!"));
    println!("\nEnter a command, or 'help' to see a list of available commands\n");

    let mut editor = match rustyline::DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => diag::fatal("initializing line editor", &e),
    };

    loop {
        match editor.readline("simbly> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    diag::shell_msg("empty input");
                    continue;
                }
                let _ = editor.add_history_entry(line);
                match commands::parse_command(line) {
                    Ok(cmd) => {
                        if !commands::execute(&runtime, cmd) {
                            break;
                        }
                    }
                    Err(msg) => diag::shell_msg(&msg),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => diag::fatal("reading shell input", &e),
        }
    }

    info!("shutting down");
    runtime.shutdown();
}
