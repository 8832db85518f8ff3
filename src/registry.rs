//! Pid → process-state bookkeeping across the traced process tree.

use crate::model::ProcessReport;
use crate::process::Process;
use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Owner of every live [`Process`] state, keyed by OS pid.
///
/// Uids are handed out monotonically and never reused, so records stay
/// distinguishable even when the kernel recycles a pid mid-build.
#[derive(Debug, Default)]
pub struct Registry {
    procs: HashMap<i32, Process>,
    next_uid: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_uid(&mut self) -> u64 {
        self.next_uid += 1;
        self.next_uid
    }

    /// Register the initial traced child.
    pub fn root(&mut self, pid: i32, image: PathBuf, cwd: PathBuf) -> &mut Process {
        let uid = self.alloc_uid();
        debug!("process {} (pid {}) started: {}", uid, pid, image.display());
        self.procs.insert(pid, Process::new(uid, pid, image, cwd));
        self.procs.get_mut(&pid).expect("just inserted")
    }

    /// Register a forked child, inheriting the parent's cwd, image and
    /// fd-table snapshot. A child that was already adopted from `/proc`
    /// (its stop raced ahead of the parent's fork event) is kept as-is.
    pub fn fork(&mut self, parent: i32, child: i32) {
        if self.procs.contains_key(&child) {
            return;
        }
        let uid = self.alloc_uid();
        match self.procs.get(&parent) {
            Some(p) => {
                let state = p.child(uid, child);
                debug!("process {} forked {} (pid {})", p.uid(), uid, child);
                self.procs.insert(child, state);
            }
            None => {
                warn!("fork event for unknown parent pid {}", parent);
                self.adopt(child);
            }
        }
    }

    /// Create state for a pid observed before its fork event, seeded from
    /// the `/proc` filesystem.
    pub fn adopt(&mut self, pid: i32) -> &mut Process {
        let uid = self.alloc_uid();
        let cwd = fs::read_link(format!("/proc/{pid}/cwd")).unwrap_or_else(|_| PathBuf::from("/"));
        let image =
            fs::read_link(format!("/proc/{pid}/exe")).unwrap_or_else(|_| PathBuf::from("unknown"));
        debug!("adopted process {} (pid {}): {}", uid, pid, image.display());
        self.procs.insert(pid, Process::new(uid, pid, image, cwd));
        self.procs.get_mut(&pid).expect("just inserted")
    }

    /// Successful exec: purge close-on-exec descriptors and refresh the
    /// image name.
    pub fn exec(&mut self, pid: i32) {
        if let Some(p) = self.procs.get_mut(&pid) {
            p.exec_purge();
            if let Ok(image) = fs::read_link(format!("/proc/{pid}/exe")) {
                p.set_image(image);
            }
        }
    }

    pub fn get_mut(&mut self, pid: i32) -> Option<&mut Process> {
        self.procs.get_mut(&pid)
    }

    pub fn get(&self, pid: i32) -> Option<&Process> {
        self.procs.get(&pid)
    }

    pub fn contains(&self, pid: i32) -> bool {
        self.procs.contains_key(&pid)
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn pids(&self) -> Vec<i32> {
        self.procs.keys().copied().collect()
    }

    /// Remove a terminated process and yield its finished record.
    pub fn exit(&mut self, pid: i32) -> Option<ProcessReport> {
        self.procs.remove(&pid).map(Process::into_report)
    }

    /// Flush every live process, e.g. when the trace is cancelled.
    pub fn drain(&mut self) -> Vec<ProcessReport> {
        let mut reports: Vec<_> = self
            .procs
            .drain()
            .map(|(_, p)| p.into_report())
            .collect();
        reports.sort_by_key(|r| r.uid);
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn uids_are_monotonic_and_distinct_from_pids() {
        let mut reg = Registry::new();
        reg.root(500, PathBuf::from("/bin/sh"), PathBuf::from("/"));
        reg.fork(500, 501);
        let a = reg.get(500).unwrap().uid();
        let b = reg.get(501).unwrap().uid();
        assert_eq!((a, b), (1, 2));
    }

    #[test]
    fn fork_inherits_cwd_and_fd_table() {
        let mut reg = Registry::new();
        let parent = reg.root(10, PathBuf::from("/bin/make"), PathBuf::from("/build"));
        parent.map_fd(3, PathBuf::from("/build/log"));
        reg.fork(10, 11);
        let child = reg.get(11).unwrap();
        assert_eq!(child.cwd(), Path::new("/build"));
        assert_eq!(child.fd_entry(3).unwrap().path, PathBuf::from("/build/log"));
        assert!(child.inputs().is_empty());
    }

    #[test]
    fn fork_keeps_previously_adopted_child() {
        let mut reg = Registry::new();
        reg.root(10, PathBuf::from("/bin/make"), PathBuf::from("/build"));
        let pid = std::process::id() as i32;
        let adopted_uid = reg.adopt(pid).uid();
        reg.fork(10, pid);
        assert_eq!(reg.get(pid).unwrap().uid(), adopted_uid);
    }

    #[test]
    fn exit_yields_report_and_forgets_pid() {
        let mut reg = Registry::new();
        let p = reg.root(10, PathBuf::from("/bin/cc"), PathBuf::from("/"));
        p.add_input(PathBuf::from("/src/a.c"));
        let report = reg.exit(10).unwrap();
        assert_eq!(report.pid, 10);
        assert!(report.inputs.contains(Path::new("/src/a.c")));
        assert!(reg.exit(10).is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn drain_flushes_everything_in_uid_order() {
        let mut reg = Registry::new();
        reg.root(10, PathBuf::from("/bin/sh"), PathBuf::from("/"));
        reg.fork(10, 11);
        reg.fork(10, 12);
        let reports = reg.drain();
        assert_eq!(reports.len(), 3);
        assert!(reports.windows(2).all(|w| w[0].uid < w[1].uid));
        assert!(reg.is_empty());
    }
}
