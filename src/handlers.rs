//! Effect semantics of each observed syscall.
//!
//! Every handler inspects one syscall-exit event and records the
//! resulting file effects on the process state. Failed syscalls record
//! nothing, with two deliberate exceptions kept from the original
//! tracer's behavior: `mmap` keys on its argument flags, and `dup3`
//! applies its close-on-exec flag unconditionally.

use crate::error::InterpretError;
use crate::model::SyscallArgs;
use crate::process::{Process, SOCKET_PATH};
use crate::remote::TracerMemory;
use std::path::{Path, PathBuf};

pub type Handler =
    fn(&mut Process, &dyn TracerMemory, &SyscallArgs) -> Result<(), InterpretError>;

type HandlerResult = Result<(), InterpretError>;

/// Pull a path argument out of the tracee. An unreadable string degrades
/// to `None` and the caller drops the event, same as a failed syscall.
fn tracee_path(mem: &dyn TracerMemory, pid: i32, addr: u64) -> Option<PathBuf> {
    let raw = mem.read_string(pid, addr);
    if raw.is_empty() {
        None
    } else {
        Some(PathBuf::from(raw))
    }
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new(""))
}

// ── Descriptor I/O ──────────────────────────────────────────────────────

pub(crate) fn sys_read(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        proc.input_fd(args.fd(0));
    }
    Ok(())
}

pub(crate) fn sys_write(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        proc.output_fd(args.fd(0));
    }
    Ok(())
}

pub(crate) fn sys_getdents(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        proc.input_fd(args.fd(0));
    }
    Ok(())
}

pub(crate) fn sys_mmap(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    let prot = args.arg(2) as i32;
    let flags = args.arg(3) as i32;
    let fd = args.fd(4);

    if args.ret != libc::MAP_ANONYMOUS as i64 && fd != -1 {
        // Writes reach the file only through shared, writable mappings.
        if flags & libc::MAP_SHARED != 0 && prot & libc::PROT_WRITE != 0 {
            proc.output_fd(fd);
        } else {
            proc.input_fd(fd);
        }
    }
    Ok(())
}

pub(crate) fn sys_ftruncate(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        proc.output_fd(args.fd(0));
    }
    Ok(())
}

// ── Opening and closing ─────────────────────────────────────────────────

pub(crate) fn sys_open(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let Some(raw) = tracee_path(mem, args.pid, args.arg(0)) else {
        return Ok(());
    };
    let flags = args.arg(1) as i32;
    let target = proc.normalize(&raw);
    proc.map_fd(args.ret, target);
    proc.set_close_exec(args.ret, flags & libc::O_CLOEXEC != 0);
    Ok(())
}

pub(crate) fn sys_openat(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let Some(raw) = tracee_path(mem, args.pid, args.arg(1)) else {
        return Ok(());
    };
    let Some(target) = proc.normalize_at(args.fd(0), &raw) else {
        return Ok(());
    };
    let flags = args.arg(2) as i32;
    proc.map_fd(args.ret, target);
    proc.set_close_exec(args.ret, flags & libc::O_CLOEXEC != 0);
    Ok(())
}

pub(crate) fn sys_close(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        proc.close_fd(args.fd(0));
    }
    Ok(())
}

// ── Descriptor duplication and control ──────────────────────────────────

pub(crate) fn sys_dup(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        proc.dup_fd(args.fd(0), args.ret);
    }
    Ok(())
}

pub(crate) fn sys_dup3(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    let newfd = args.fd(1);
    if !args.failed() {
        proc.dup_fd(args.fd(0), newfd);
    }
    let flags = args.arg(2) as i32;
    proc.set_close_exec(newfd, flags & libc::O_CLOEXEC != 0);
    Ok(())
}

pub(crate) fn sys_fcntl(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let fd = args.fd(0);
    let cmd = args.arg(1) as i32;
    match cmd {
        libc::F_DUPFD => proc.dup_fd(fd, args.ret),
        libc::F_DUPFD_CLOEXEC => {
            proc.dup_fd(fd, args.ret);
            proc.set_close_exec(args.ret, false);
        }
        libc::F_SETFD => {
            let arg = args.arg(2) as i32;
            proc.set_close_exec(fd, arg & libc::FD_CLOEXEC != 0);
        }
        libc::F_GETFD | libc::F_GETFL | libc::F_SETFL => {}
        libc::F_GETLK | libc::F_SETLK | libc::F_SETLKW => {}
        libc::F_OFD_GETLK | libc::F_OFD_SETLK | libc::F_OFD_SETLKW => {}
        _ => return Err(InterpretError::UnknownFcntl { cmd: cmd as i64 }),
    }
    Ok(())
}

// ── Pipes and special descriptors ───────────────────────────────────────

fn pipe_fds(mem: &dyn TracerMemory, args: &SyscallArgs) -> Result<(i64, i64), InterpretError> {
    let mut buf = [0u8; 8];
    mem.read_buffer(args.pid, args.arg(0), &mut buf)?;
    let (mut rfd, mut wfd) = ([0u8; 4], [0u8; 4]);
    rfd.copy_from_slice(&buf[..4]);
    wfd.copy_from_slice(&buf[4..]);
    Ok((i32::from_ne_bytes(rfd) as i64, i32::from_ne_bytes(wfd) as i64))
}

pub(crate) fn sys_pipe(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let (rfd, wfd) = pipe_fds(mem, args)?;
    proc.pipe(rfd, wfd);
    Ok(())
}

pub(crate) fn sys_pipe2(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let (rfd, wfd) = pipe_fds(mem, args)?;
    proc.pipe(rfd, wfd);

    let close_exec = args.arg(1) as i32 & libc::O_CLOEXEC != 0;
    proc.set_close_exec(rfd, close_exec);
    proc.set_close_exec(wfd, close_exec);
    Ok(())
}

pub(crate) fn sys_socket(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        proc.map_synthetic(args.ret, PathBuf::from(SOCKET_PATH));
    }
    Ok(())
}

pub(crate) fn sys_epoll_create(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        let target = PathBuf::from(format!("/proc/{}/epoll", args.pid));
        proc.map_synthetic(args.ret, target);
    }
    Ok(())
}

pub(crate) fn sys_eventfd2(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        let target = PathBuf::from(format!("/proc/{}/event", args.pid));
        proc.map_synthetic(args.ret, target);
        let flags = args.arg(1) as i32;
        proc.set_close_exec(args.ret, flags & libc::EFD_CLOEXEC != 0);
    }
    Ok(())
}

// ── Metadata queries ────────────────────────────────────────────────────

pub(crate) fn sys_stat(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    if let Some(raw) = tracee_path(mem, args.pid, args.arg(0)) {
        let target = proc.normalize(&raw);
        proc.add_touched(target);
    }
    Ok(())
}

pub(crate) fn sys_fstat(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        proc.touched_fd(args.fd(0));
    }
    Ok(())
}

pub(crate) fn sys_statat(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let Some(raw) = tracee_path(mem, args.pid, args.arg(1)) else {
        return Ok(());
    };
    if let Some(target) = proc.normalize_at(args.fd(0), &raw) {
        proc.add_touched(target);
    }
    Ok(())
}

pub(crate) fn sys_readlink(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    if let Some(raw) = tracee_path(mem, args.pid, args.arg(0)) {
        let target = proc.normalize(&raw);
        proc.add_input(target);
    }
    Ok(())
}

pub(crate) fn sys_readlinkat(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let Some(raw) = tracee_path(mem, args.pid, args.arg(1)) else {
        return Ok(());
    };
    if let Some(target) = proc.normalize_at(args.fd(0), &raw) {
        proc.add_input(target);
    }
    Ok(())
}

pub(crate) fn sys_getxattr(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let Some(raw) = tracee_path(mem, args.pid, args.arg(0)) else {
        return Ok(());
    };
    // Only the parent is normalized; the trailing component is taken
    // verbatim.
    let parent = proc.normalize(parent_of(&raw));
    if let Some(name) = raw.file_name() {
        proc.add_input(parent.join(name));
    }
    Ok(())
}

pub(crate) fn sys_lgetxattr(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    if let Some(raw) = tracee_path(mem, args.pid, args.arg(0)) {
        let target = proc.normalize(&raw);
        proc.add_input(target);
    }
    Ok(())
}

pub(crate) fn sys_fsetxattr(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if !args.failed() {
        proc.output_fd(args.fd(0));
    }
    Ok(())
}

pub(crate) fn sys_utime(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    if let Some(raw) = tracee_path(mem, args.pid, args.arg(0)) {
        let target = proc.normalize(&raw);
        proc.add_output(target);
    }
    Ok(())
}

// ── Working directory ───────────────────────────────────────────────────

pub(crate) fn sys_chdir(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    if let Some(raw) = tracee_path(mem, args.pid, args.arg(0)) {
        let cwd = proc.normalize(&raw);
        proc.set_cwd(cwd);
    }
    Ok(())
}

pub(crate) fn sys_fchdir(proc: &mut Process, _mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let cwd = proc.fd_path(args.fd(0))?;
    proc.set_cwd(cwd);
    Ok(())
}

// ── Filesystem structure ────────────────────────────────────────────────

pub(crate) fn sys_mkdir(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    if let Some(raw) = tracee_path(mem, args.pid, args.arg(0)) {
        let target = proc.normalize(&raw);
        proc.add_output(target);
    }
    Ok(())
}

pub(crate) fn sys_mkdirat(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let Some(raw) = tracee_path(mem, args.pid, args.arg(1)) else {
        return Ok(());
    };
    if let Some(target) = proc.normalize_at(args.fd(0), &raw) {
        proc.add_output(target);
    }
    Ok(())
}

pub(crate) fn sys_unlink(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    if let Some(raw) = tracee_path(mem, args.pid, args.arg(0)) {
        let target = proc.normalize(&raw);
        proc.remove(target);
    }
    Ok(())
}

pub(crate) fn sys_unlinkat(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let Some(raw) = tracee_path(mem, args.pid, args.arg(1)) else {
        return Ok(());
    };
    if let Some(target) = proc.normalize_at(args.fd(0), &raw) {
        proc.remove(target);
    }
    Ok(())
}

pub(crate) fn sys_rename(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let (Some(src), Some(dst)) = (
        tracee_path(mem, args.pid, args.arg(0)),
        tracee_path(mem, args.pid, args.arg(1)),
    ) else {
        return Ok(());
    };
    let src = proc.normalize(&src);
    let dst = proc.normalize(&dst);
    proc.rename(src, dst);
    Ok(())
}

pub(crate) fn sys_renameat(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let (Some(src_raw), Some(dst_raw)) = (
        tracee_path(mem, args.pid, args.arg(1)),
        tracee_path(mem, args.pid, args.arg(3)),
    ) else {
        return Ok(());
    };
    let (Some(src), Some(dst)) = (
        proc.normalize_at(args.fd(0), &src_raw),
        proc.normalize_at(args.fd(2), &dst_raw),
    ) else {
        return Ok(());
    };
    proc.rename(src, dst);
    Ok(())
}

pub(crate) fn sys_link(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let (Some(src_raw), Some(dst_raw)) = (
        tracee_path(mem, args.pid, args.arg(0)),
        tracee_path(mem, args.pid, args.arg(1)),
    ) else {
        return Ok(());
    };
    let Some(name) = dst_raw.file_name() else {
        return Ok(());
    };
    let src = proc.normalize(&src_raw);
    let dst_parent = proc.normalize(parent_of(&dst_raw));
    proc.link(src, dst_parent.join(name));
    Ok(())
}

pub(crate) fn sys_linkat(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let (Some(src_raw), Some(dst_raw)) = (
        tracee_path(mem, args.pid, args.arg(1)),
        tracee_path(mem, args.pid, args.arg(3)),
    ) else {
        return Ok(());
    };
    let Some(name) = dst_raw.file_name() else {
        return Ok(());
    };
    let (Some(src), Some(dst_parent)) = (
        proc.normalize_at(args.fd(0), &src_raw),
        proc.normalize_at(args.fd(2), parent_of(&dst_raw)),
    ) else {
        return Ok(());
    };
    proc.link(src, dst_parent.join(name));
    Ok(())
}

pub(crate) fn sys_symlink(proc: &mut Process, mem: &dyn TracerMemory, args: &SyscallArgs) -> HandlerResult {
    if args.failed() {
        return Ok(());
    }
    let (Some(src_raw), Some(dst_raw)) = (
        tracee_path(mem, args.pid, args.arg(0)),
        tracee_path(mem, args.pid, args.arg(1)),
    ) else {
        return Ok(());
    };
    let Some(name) = dst_raw.file_name() else {
        return Ok(());
    };
    // The link text is relative to the directory holding the new link,
    // not to the caller's cwd.
    let parent = proc.normalize(parent_of(&dst_raw));
    let src = proc.normalize_with(&parent, &src_raw);
    let dst = parent.join(name);

    // configure scripts create links pointing at themselves; skip those.
    if src != dst {
        proc.link(src, dst);
    }
    Ok(())
}

// ── Unimplemented interpretations ───────────────────────────────────────

pub(crate) fn sys_splice(_proc: &mut Process, _mem: &dyn TracerMemory, _args: &SyscallArgs) -> HandlerResult {
    Err(InterpretError::NotImplemented { name: "splice" })
}

pub(crate) fn sys_flistxattr(_proc: &mut Process, _mem: &dyn TracerMemory, _args: &SyscallArgs) -> HandlerResult {
    Err(InterpretError::NotImplemented { name: "flistxattr" })
}
