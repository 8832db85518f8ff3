//! Reading strings and buffers out of a traced process's address space.

use crate::error::InterpretError;
use nix::sys::ptrace;
use nix::unistd::Pid;

/// Longest path the string reader will pull out of a tracee before
/// giving up on finding a terminator.
const MAX_STRING: usize = 4096;

/// Access to traced-process memory, injected into the syscall handlers
/// so the core stays testable with canned data.
pub trait TracerMemory {
    /// Read a NUL-terminated C string. Failure degrades to an empty
    /// string, which handlers treat the same as a failed syscall.
    fn read_string(&self, pid: i32, addr: u64) -> String;

    /// Bulk read of `buf.len()` bytes. Unlike string reads this can be
    /// load-bearing (pipe fd recovery), so failure is an error.
    fn read_buffer(&self, pid: i32, addr: u64, buf: &mut [u8]) -> Result<(), InterpretError>;
}

/// Word-at-a-time reader over `PTRACE_PEEKDATA`.
#[derive(Debug, Default)]
pub struct PtraceMemory;

impl PtraceMemory {
    fn peek(pid: i32, addr: u64) -> Option<[u8; 8]> {
        let word = ptrace::read(Pid::from_raw(pid), addr as ptrace::AddressType).ok()?;
        Some(word.to_ne_bytes())
    }
}

impl TracerMemory for PtraceMemory {
    fn read_string(&self, pid: i32, addr: u64) -> String {
        if addr == 0 {
            return String::new();
        }
        let mut bytes = Vec::new();
        let mut cursor = addr;
        while bytes.len() < MAX_STRING {
            let Some(word) = Self::peek(pid, cursor) else {
                return String::new();
            };
            for &b in &word {
                if b == 0 {
                    return String::from_utf8_lossy(&bytes).into_owned();
                }
                bytes.push(b);
            }
            cursor += word.len() as u64;
        }
        String::new()
    }

    fn read_buffer(&self, pid: i32, addr: u64, buf: &mut [u8]) -> Result<(), InterpretError> {
        let mut filled = 0;
        while filled < buf.len() {
            let word = Self::peek(pid, addr + filled as u64).ok_or(InterpretError::RemoteRead {
                pid,
                addr,
                len: buf.len(),
            })?;
            let take = (buf.len() - filled).min(word.len());
            buf[filled..filled + take].copy_from_slice(&word[..take]);
            filled += take;
        }
        Ok(())
    }
}
