//! Error types for the interpretation core.

use thiserror::Error;

/// Errors a syscall handler can raise. Anything escaping a handler is
/// wrapped by the dispatcher with the syscall number, process uid and
/// image before it reaches the trace driver.
#[derive(Debug, Error)]
pub enum InterpretError {
    /// `fcntl` with a command the effect model does not know about.
    #[error("unknown fcntl command {cmd}")]
    UnknownFcntl { cmd: i64 },

    /// Syscall observed but its effect semantics are deliberately not
    /// modelled (`splice`, `flistxattr`).
    #[error("{name}: effect interpretation not implemented")]
    NotImplemented { name: &'static str },

    /// An fd the handler must resolve is absent from the fd-table.
    #[error("fd {fd} is not mapped")]
    UnmappedFd { fd: i64 },

    /// Bulk read out of the traced process's memory failed on a syscall
    /// that succeeded. The tracer contract guarantees the buffer is
    /// readable, so this is not recoverable.
    #[error("failed to read {len} bytes at {addr:#x} from pid {pid}")]
    RemoteRead { pid: i32, addr: u64, len: usize },
}
