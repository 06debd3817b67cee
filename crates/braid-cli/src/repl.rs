// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Tobias Sarnowski <tobias@sarnowski.cloud>

//! Interactive read-eval-print loop.

use std::io::{self, Write};

use braid_vm::{InterpretError, Vm};

/// Reads one line at a time, interpreting each against a single shared
/// [`Vm`] so globals, open upvalues, and GC state persist across lines.
/// A failed line is reported to stderr but never ends the session; only
/// end-of-input (`^D`) does.
pub fn run() {
    let mut vm = Vm::new();
    let stdin = io::stdin();

    loop {
        print!("> ");
        if io::stdout().flush().is_err() {
            return;
        }

        let mut line = String::new();
        match stdin.read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) => {
                eprintln!("error reading stdin: {err}");
                return;
            }
        }

        if let Err(err) = vm.interpret(&line) {
            report(&err);
        }
    }
}

fn report(err: &InterpretError) {
    match err {
        InterpretError::Compile(errors) => {
            for e in errors {
                eprintln!("{e}");
            }
        }
        InterpretError::Runtime(failure) => eprintln!("{failure}"),
    }
}
