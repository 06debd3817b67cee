//! Native (host) functions installed into `globals` at VM startup.

use std::sync::OnceLock;
use std::time::Instant;

use crate::value::Value;

use super::Vm;

/// Registers the small standard library every VM instance starts with.
/// `clock` is the canonical member of this family: it exercises the
/// native-call path end-to-end and gives scripts a way to measure
/// themselves without the language needing any I/O primitives of its own.
pub(super) fn install(vm: &mut Vm) {
    vm.define_native("clock", 0, clock);
}

fn clock(_args: &[Value]) -> Result<Value, String> {
    static PROCESS_START: OnceLock<Instant> = OnceLock::new();
    let start = PROCESS_START.get_or_init(Instant::now);
    Ok(Value::Number(start.elapsed().as_secs_f64()))
}
