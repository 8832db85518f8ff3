//! Canonical records exchanged between the tracer, the core and the sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use uuid::Uuid;

/// One syscall-exit event as delivered by the tracer.
#[derive(Debug, Clone, Copy)]
pub struct SyscallArgs {
    /// OS pid of the thread that made the call.
    pub pid: i32,
    /// Syscall number (x86-64 table).
    pub nr: i64,
    /// The six raw argument words.
    pub args: [u64; 6],
    /// Return value; negative means the kernel reported failure.
    pub ret: i64,
}

impl SyscallArgs {
    pub fn arg(&self, i: usize) -> u64 {
        self.args[i]
    }

    /// Argument word reinterpreted as a file descriptor. Descriptors are
    /// ints at the ABI level, so the word is narrowed before widening to
    /// keep `AT_FDCWD` and other negative values negative.
    pub fn fd(&self, i: usize) -> i64 {
        self.args[i] as i32 as i64
    }

    pub fn failed(&self) -> bool {
        self.ret < 0
    }
}

/// Session header, first record of a trace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceHeader {
    pub start: DateTime<Utc>,
    pub session: Uuid,
    pub command: Vec<String>,
}

impl TraceHeader {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            start: Utc::now(),
            session: Uuid::new_v4(),
            command,
        }
    }
}

/// A structural `(src, dst)` operation: rename or link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPair {
    pub src: PathBuf,
    pub dst: PathBuf,
}

/// Everything recorded about one terminated process.
///
/// `uid` is the registry-assigned identifier; it is stable across pid
/// reuse, unlike `pid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessReport {
    pub uid: u64,
    pub pid: i32,
    pub image: PathBuf,
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub inputs: BTreeSet<PathBuf>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub outputs: BTreeSet<PathBuf>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub touched: BTreeSet<PathBuf>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub renames: Vec<PathPair>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub links: Vec<PathPair>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub removals: Vec<PathBuf>,
}
