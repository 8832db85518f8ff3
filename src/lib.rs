//! Syscall interpretation core for build-dependency tracing.
//!
//! The library half of `deptrace`: given a stream of syscall-exit events
//! from a tracer, maintain each traced process's fd-table and working
//! directory and translate the events into per-process file effects
//! (inputs, outputs, touched paths, renames, links, removals). The
//! binary half drives it from a ptrace loop and serializes the records.

pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod io;
pub mod model;
pub mod path;
pub mod process;
pub mod registry;
pub mod remote;
pub mod testing;
pub mod trace;

pub use dispatch::handle_syscall;
pub use error::InterpretError;
pub use model::{ProcessReport, SyscallArgs, TraceHeader};
pub use process::Process;
pub use registry::Registry;
pub use remote::TracerMemory;
