//! Test helper binary that produces a deleted-but-open file.
//!
//! Creates the given file, fills it with a deterministic pattern, unlinks
//! it while keeping the descriptor open, prints `ready`, and holds the
//! descriptor until a line arrives on stdin. Integration tests use it to
//! exercise recovery across a real process boundary.
//!
//! Usage:
//!   fd_holder <path> <bytes>

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

/// Byte pattern recognisable in recovered artifacts.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: fd_holder <path> <bytes>");
        return ExitCode::from(1);
    }
    let path = &args[1];
    let bytes: usize = match args[2].parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("Invalid byte count: {}", args[2]);
            return ExitCode::from(1);
        }
    };

    let mut file = match OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(path)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Failed to create file: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = file.write_all(&pattern(bytes)) {
        eprintln!("Failed to write: {e}");
        return ExitCode::from(1);
    }
    if let Err(e) = file.sync_all() {
        eprintln!("Failed to sync: {e}");
        return ExitCode::from(1);
    }
    if let Err(e) = fs::remove_file(path) {
        eprintln!("Failed to unlink: {e}");
        return ExitCode::from(1);
    }

    // Signal readiness, then keep the descriptor alive until the driver
    // tells us to let go.
    println!("ready");
    io::stdout().flush().ok();
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).ok();
    drop(file);

    ExitCode::SUCCESS
}
