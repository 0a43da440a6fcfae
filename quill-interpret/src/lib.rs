#![forbid(unsafe_code)]

mod value;
mod vm;

pub use value::Value;
pub use vm::{ExecOutcome, Flow, RuntimeError, Vm, VmConfig, run_source};
