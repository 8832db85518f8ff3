//! Per-process mutable state: cwd, fd-table and file-effect sets.

use crate::error::InterpretError;
use crate::model::{PathPair, ProcessReport};
use crate::path;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Sentinel target of every socket descriptor.
pub const SOCKET_PATH: &str = "/proc/network";

/// One slot of the fd-table.
///
/// `synthetic` marks descriptors without a real file behind them
/// (pipes, sockets, epoll, eventfd); their targets resolve uniformly but
/// are kept out of the effect sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FdEntry {
    pub path: PathBuf,
    pub close_exec: bool,
    pub synthetic: bool,
}

/// State of one live traced process.
///
/// Created by the registry on fork/clone, drained into a [`ProcessReport`]
/// on exit. Every mutation corresponds to exactly one successful syscall.
#[derive(Debug, Clone)]
pub struct Process {
    uid: u64,
    pid: i32,
    image: PathBuf,
    cwd: PathBuf,
    fds: HashMap<i64, FdEntry>,
    inputs: BTreeSet<PathBuf>,
    outputs: BTreeSet<PathBuf>,
    touched: BTreeSet<PathBuf>,
    renames: Vec<PathPair>,
    links: Vec<PathPair>,
    removals: Vec<PathBuf>,
}

impl Process {
    pub fn new(uid: u64, pid: i32, image: PathBuf, cwd: PathBuf) -> Self {
        Self {
            uid,
            pid,
            image,
            cwd: path::clean(&cwd),
            fds: HashMap::new(),
            inputs: BTreeSet::new(),
            outputs: BTreeSet::new(),
            touched: BTreeSet::new(),
            renames: Vec::new(),
            links: Vec::new(),
            removals: Vec::new(),
        }
    }

    /// Child state at fork: cwd, image and a snapshot of the fd-table are
    /// inherited, effect sets start empty.
    pub fn child(&self, uid: u64, pid: i32) -> Self {
        let mut child = Self::new(uid, pid, self.image.clone(), self.cwd.clone());
        child.fds = self.fds.clone();
        child
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    pub fn set_image(&mut self, image: PathBuf) {
        self.image = image;
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    // ── Path resolution ─────────────────────────────────────────────────

    /// Resolve `raw` against the current working directory.
    pub fn normalize(&self, raw: &Path) -> PathBuf {
        path::resolve(&self.cwd, raw)
    }

    /// Resolve `raw` against an explicit absolute base.
    pub fn normalize_with(&self, base: &Path, raw: &Path) -> PathBuf {
        path::resolve(base, raw)
    }

    /// Resolve `raw` against a directory descriptor, `AT_FDCWD` meaning
    /// the working directory. Returns `None` when a relative path names a
    /// dirfd the table does not know; callers must then treat the event
    /// as a failed syscall rather than fabricate a path.
    pub fn normalize_at(&self, dirfd: i64, raw: &Path) -> Option<PathBuf> {
        if raw.is_absolute() || dirfd == libc::AT_FDCWD as i64 {
            return Some(self.normalize(raw));
        }
        let base = self.fds.get(&dirfd)?;
        Some(path::resolve(&base.path, raw))
    }

    // ── Fd-table mutations ──────────────────────────────────────────────

    pub fn map_fd(&mut self, fd: i64, target: PathBuf) {
        self.fds.insert(
            fd,
            FdEntry {
                path: target,
                close_exec: false,
                synthetic: false,
            },
        );
    }

    pub fn map_synthetic(&mut self, fd: i64, target: PathBuf) {
        self.fds.insert(
            fd,
            FdEntry {
                path: target,
                close_exec: false,
                synthetic: true,
            },
        );
    }

    pub fn set_close_exec(&mut self, fd: i64, on: bool) {
        if let Some(entry) = self.fds.get_mut(&fd) {
            entry.close_exec = on;
        }
    }

    /// Copy the entry of `src` into slot `dst` with close-on-exec reset,
    /// per `dup`/`dup2` semantics. `dup2(a, a)` succeeds in the kernel
    /// without touching the flag, so an identical pair is left alone.
    pub fn dup_fd(&mut self, src: i64, dst: i64) {
        if src == dst {
            return;
        }
        if let Some(entry) = self.fds.get(&src).cloned() {
            self.fds.insert(
                dst,
                FdEntry {
                    close_exec: false,
                    ..entry
                },
            );
        }
    }

    pub fn close_fd(&mut self, fd: i64) {
        self.fds.remove(&fd);
    }

    /// Install both halves of a pipe under a shared synthetic target.
    pub fn pipe(&mut self, rfd: i64, wfd: i64) {
        let target = PathBuf::from(format!("/proc/{}/pipe", self.pid));
        self.map_synthetic(rfd, target.clone());
        self.map_synthetic(wfd, target);
    }

    pub fn fd_entry(&self, fd: i64) -> Option<&FdEntry> {
        self.fds.get(&fd)
    }

    pub fn fd_count(&self) -> usize {
        self.fds.len()
    }

    /// Target of `fd`, or an error when the table has no such slot.
    pub fn fd_path(&self, fd: i64) -> Result<PathBuf, InterpretError> {
        self.fds
            .get(&fd)
            .map(|e| e.path.clone())
            .ok_or(InterpretError::UnmappedFd { fd })
    }

    pub fn set_cwd(&mut self, cwd: PathBuf) {
        debug_assert!(cwd.is_absolute(), "cwd must be absolute");
        self.cwd = cwd;
    }

    /// Purge close-on-exec descriptors; the registry calls this when the
    /// process successfully replaces its image.
    pub fn exec_purge(&mut self) {
        self.fds.retain(|_, entry| !entry.close_exec);
    }

    // ── Effect recording ────────────────────────────────────────────────

    pub fn add_input(&mut self, normalized: PathBuf) {
        self.inputs.insert(normalized);
    }

    pub fn add_output(&mut self, normalized: PathBuf) {
        self.outputs.insert(normalized);
    }

    pub fn add_touched(&mut self, normalized: PathBuf) {
        self.touched.insert(normalized);
    }

    pub fn input_fd(&mut self, fd: i64) {
        if let Some(target) = self.real_target(fd) {
            self.inputs.insert(target);
        }
    }

    pub fn output_fd(&mut self, fd: i64) {
        if let Some(target) = self.real_target(fd) {
            self.outputs.insert(target);
        }
    }

    pub fn touched_fd(&mut self, fd: i64) {
        if let Some(target) = self.real_target(fd) {
            self.touched.insert(target);
        }
    }

    /// Fd-form effects silently skip unknown descriptors (stdio and
    /// descriptors inherited from outside the trace) and synthetic ones.
    fn real_target(&self, fd: i64) -> Option<PathBuf> {
        let entry = self.fds.get(&fd)?;
        if entry.synthetic {
            return None;
        }
        Some(entry.path.clone())
    }

    /// Record a rename. The old name fed the operation and the new name
    /// came out of it, so both effect sets gain a member.
    pub fn rename(&mut self, src: PathBuf, dst: PathBuf) {
        self.inputs.insert(src.clone());
        self.outputs.insert(dst.clone());
        self.renames.push(PathPair { src, dst });
    }

    /// Record a hard or symbolic link from `src` to the new name `dst`.
    pub fn link(&mut self, src: PathBuf, dst: PathBuf) {
        self.touched.insert(src.clone());
        self.outputs.insert(dst.clone());
        self.links.push(PathPair { src, dst });
    }

    pub fn remove(&mut self, target: PathBuf) {
        self.outputs.insert(target.clone());
        self.removals.push(target);
    }

    pub fn inputs(&self) -> &BTreeSet<PathBuf> {
        &self.inputs
    }

    pub fn outputs(&self) -> &BTreeSet<PathBuf> {
        &self.outputs
    }

    pub fn touched(&self) -> &BTreeSet<PathBuf> {
        &self.touched
    }

    pub fn renames(&self) -> &[PathPair] {
        &self.renames
    }

    pub fn links(&self) -> &[PathPair] {
        &self.links
    }

    pub fn removals(&self) -> &[PathBuf] {
        &self.removals
    }

    pub fn into_report(self) -> ProcessReport {
        ProcessReport {
            uid: self.uid,
            pid: self.pid,
            image: self.image,
            inputs: self.inputs,
            outputs: self.outputs,
            touched: self.touched,
            renames: self.renames,
            links: self.links,
            removals: self.removals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc() -> Process {
        Process::new(1, 100, PathBuf::from("/bin/make"), PathBuf::from("/home"))
    }

    #[test]
    fn map_close_map_is_idempotent() {
        let mut a = proc();
        a.map_fd(3, PathBuf::from("/tmp/a"));
        let snapshot = a.fd_entry(3).cloned();
        a.close_fd(3);
        a.map_fd(3, PathBuf::from("/tmp/a"));
        assert_eq!(a.fd_entry(3).cloned(), snapshot);
        assert_eq!(a.fd_count(), 1);
    }

    #[test]
    fn dup_shares_target_but_not_identity() {
        let mut p = proc();
        p.map_fd(3, PathBuf::from("/home/x"));
        p.dup_fd(3, 4);
        assert_eq!(p.fd_entry(4).unwrap().path, PathBuf::from("/home/x"));
        p.close_fd(3);
        assert!(p.fd_entry(3).is_none());
        assert_eq!(p.fd_entry(4).unwrap().path, PathBuf::from("/home/x"));
    }

    #[test]
    fn dup_resets_close_exec() {
        let mut p = proc();
        p.map_fd(3, PathBuf::from("/home/x"));
        p.set_close_exec(3, true);
        p.dup_fd(3, 4);
        assert!(!p.fd_entry(4).unwrap().close_exec);
    }

    #[test]
    fn self_dup_preserves_close_exec() {
        let mut p = proc();
        p.map_fd(3, PathBuf::from("/home/x"));
        p.set_close_exec(3, true);
        p.dup_fd(3, 3);
        assert!(p.fd_entry(3).unwrap().close_exec);
    }

    #[test]
    fn exec_purges_only_close_exec_entries() {
        let mut p = proc();
        p.map_fd(3, PathBuf::from("/a"));
        p.map_fd(4, PathBuf::from("/b"));
        p.set_close_exec(4, true);
        p.exec_purge();
        assert!(p.fd_entry(3).is_some());
        assert!(p.fd_entry(4).is_none());
        assert!(!p.fd_entry(3).unwrap().close_exec);
    }

    #[test]
    fn repeated_input_is_set_level_idempotent() {
        let mut p = proc();
        p.add_input(PathBuf::from("/src/lib.c"));
        p.add_input(PathBuf::from("/src/lib.c"));
        assert_eq!(p.inputs().len(), 1);
    }

    #[test]
    fn fd_effects_skip_unknown_and_synthetic() {
        let mut p = proc();
        p.input_fd(7);
        p.pipe(5, 6);
        p.input_fd(5);
        p.output_fd(6);
        p.map_synthetic(8, PathBuf::from(SOCKET_PATH));
        p.output_fd(8);
        assert!(p.inputs().is_empty());
        assert!(p.outputs().is_empty());
    }

    #[test]
    fn rename_feeds_both_effect_sets() {
        let mut p = proc();
        p.rename(PathBuf::from("/a"), PathBuf::from("/b"));
        assert!(p.inputs().contains(Path::new("/a")));
        assert!(p.outputs().contains(Path::new("/b")));
        assert_eq!(p.renames().len(), 1);
    }

    #[test]
    fn link_touches_src_and_outputs_dst() {
        let mut p = proc();
        p.link(PathBuf::from("/a"), PathBuf::from("/b"));
        assert!(p.touched().contains(Path::new("/a")));
        assert!(p.outputs().contains(Path::new("/b")));
    }

    #[test]
    fn removal_order_is_preserved() {
        let mut p = proc();
        p.remove(PathBuf::from("/b"));
        p.remove(PathBuf::from("/a"));
        assert_eq!(p.removals(), &[PathBuf::from("/b"), PathBuf::from("/a")]);
    }

    #[test]
    fn normalize_at_fdcwd_uses_cwd() {
        let p = proc();
        assert_eq!(
            p.normalize_at(libc::AT_FDCWD as i64, Path::new("sub/../f")),
            Some(PathBuf::from("/home/f"))
        );
    }

    #[test]
    fn normalize_at_unknown_dirfd_is_none() {
        let p = proc();
        assert_eq!(p.normalize_at(9, Path::new("f")), None);
        // An absolute path never consults the dirfd.
        assert_eq!(p.normalize_at(9, Path::new("/f")), Some(PathBuf::from("/f")));
    }

    #[test]
    fn normalize_at_resolves_against_dirfd_target() {
        let mut p = proc();
        p.map_fd(3, PathBuf::from("/srv/dir"));
        assert_eq!(p.normalize_at(3, Path::new("f")), Some(PathBuf::from("/srv/dir/f")));
    }
}
