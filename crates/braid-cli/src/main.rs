// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Tobias Sarnowski <tobias@sarnowski.cloud>

//! Command-line entry point: an interactive REPL when invoked with no
//! arguments, a file interpreter when invoked with exactly one.

mod repl;

use std::fs;
use std::process::ExitCode;

use braid_vm::{InterpretError, Vm};

/// BSD `sysexits.h` codes; the CLI's exit-status contract is pinned to
/// these exact values rather than to whatever a generic `clap` error path
/// would produce.
mod sysexits {
    pub const OK: u8 = 0;
    pub const USAGE: u8 = 64;
    pub const DATAERR: u8 = 65;
    pub const SOFTWARE: u8 = 70;
    pub const IOERR: u8 = 74;
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => {
            repl::run();
            ExitCode::from(sysexits::OK)
        }
        [path] => run_file(path),
        _ => {
            eprintln!("Usage: braid [path]");
            ExitCode::from(sysexits::USAGE)
        }
    }
}

fn run_file(path: &str) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("Could not read file '{path}': {err}");
            return ExitCode::from(sysexits::IOERR);
        }
    };

    let mut vm = Vm::new();
    match vm.interpret(&source) {
        Ok(()) => ExitCode::from(sysexits::OK),
        Err(InterpretError::Compile(errors)) => {
            for err in &errors {
                eprintln!("{err}");
            }
            ExitCode::from(sysexits::DATAERR)
        }
        Err(InterpretError::Runtime(failure)) => {
            eprintln!("{failure}");
            ExitCode::from(sysexits::SOFTWARE)
        }
    }
}
