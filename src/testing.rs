//! Canned tracee memory for driving the core without a tracer.

use crate::error::InterpretError;
use crate::remote::TracerMemory;
use std::collections::HashMap;

/// In-memory [`TracerMemory`]: remote addresses map to preloaded strings
/// and buffers. Addresses with no entry behave like unreadable memory.
#[derive(Debug, Default)]
pub struct FakeMemory {
    strings: HashMap<u64, String>,
    buffers: HashMap<u64, Vec<u8>>,
}

impl FakeMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn string(mut self, addr: u64, s: &str) -> Self {
        self.strings.insert(addr, s.to_string());
        self
    }

    pub fn buffer(mut self, addr: u64, bytes: Vec<u8>) -> Self {
        self.buffers.insert(addr, bytes);
        self
    }

    /// Preload the two-int buffer `pipe`/`pipe2` write their fds into.
    pub fn pipe_fds(self, addr: u64, rfd: i32, wfd: i32) -> Self {
        let mut bytes = rfd.to_ne_bytes().to_vec();
        bytes.extend_from_slice(&wfd.to_ne_bytes());
        self.buffer(addr, bytes)
    }
}

impl TracerMemory for FakeMemory {
    fn read_string(&self, _pid: i32, addr: u64) -> String {
        self.strings.get(&addr).cloned().unwrap_or_default()
    }

    fn read_buffer(&self, pid: i32, addr: u64, buf: &mut [u8]) -> Result<(), InterpretError> {
        match self.buffers.get(&addr) {
            Some(bytes) if bytes.len() >= buf.len() => {
                buf.copy_from_slice(&bytes[..buf.len()]);
                Ok(())
            }
            _ => Err(InterpretError::RemoteRead {
                pid,
                addr,
                len: buf.len(),
            }),
        }
    }
}
