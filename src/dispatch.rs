//! Sparse syscall-number → handler table and dispatch.

use crate::handlers::*;
use crate::model::SyscallArgs;
use crate::process::Process;
use crate::remote::TracerMemory;
use anyhow::Context;
use libc::c_long;
use once_cell::sync::Lazy;
use std::collections::HashMap;

/// What the table knows about one syscall number.
///
/// `Ignore` is a known syscall audited as irrelevant to the file-effect
/// model; a number absent from the table has never been audited. Both
/// record nothing at runtime, but the distinction is kept so the table
/// documents which is which.
#[derive(Clone, Copy)]
pub enum Slot {
    Effect(Handler),
    Ignore,
}

/// Syscalls with file-effect semantics. Numbers are the x86-64 table.
static EFFECTS: &[(c_long, Handler)] = &[
    // Descriptor I/O.
    (libc::SYS_read, sys_read),
    (libc::SYS_pread64, sys_read),
    (libc::SYS_readv, sys_read),
    (libc::SYS_write, sys_write),
    (libc::SYS_writev, sys_write),
    (libc::SYS_getdents, sys_getdents),
    (libc::SYS_getdents64, sys_getdents),
    (libc::SYS_mmap, sys_mmap),
    (libc::SYS_ftruncate, sys_ftruncate),
    (libc::SYS_fallocate, sys_ftruncate),
    // Opening, closing, duplicating.
    (libc::SYS_open, sys_open),
    (libc::SYS_creat, sys_open),
    (libc::SYS_openat, sys_openat),
    (libc::SYS_close, sys_close),
    (libc::SYS_dup, sys_dup),
    (libc::SYS_dup2, sys_dup),
    (libc::SYS_dup3, sys_dup3),
    (libc::SYS_fcntl, sys_fcntl),
    // Pipes and special descriptors.
    (libc::SYS_pipe, sys_pipe),
    (libc::SYS_pipe2, sys_pipe2),
    (libc::SYS_socket, sys_socket),
    (libc::SYS_epoll_create, sys_epoll_create),
    (libc::SYS_epoll_create1, sys_epoll_create),
    (libc::SYS_eventfd2, sys_eventfd2),
    // Metadata.
    (libc::SYS_stat, sys_stat),
    (libc::SYS_lstat, sys_stat),
    (libc::SYS_fstat, sys_fstat),
    (libc::SYS_newfstatat, sys_statat),
    (libc::SYS_access, sys_stat),
    (libc::SYS_faccessat, sys_statat),
    (libc::SYS_readlink, sys_readlink),
    (libc::SYS_readlinkat, sys_readlinkat),
    (libc::SYS_utime, sys_utime),
    (libc::SYS_getxattr, sys_getxattr),
    (libc::SYS_lgetxattr, sys_lgetxattr),
    (libc::SYS_llistxattr, sys_lgetxattr),
    (libc::SYS_fsetxattr, sys_fsetxattr),
    (libc::SYS_flistxattr, sys_flistxattr),
    // Working directory.
    (libc::SYS_chdir, sys_chdir),
    (libc::SYS_fchdir, sys_fchdir),
    // Filesystem structure.
    (libc::SYS_mkdir, sys_mkdir),
    (libc::SYS_mkdirat, sys_mkdirat),
    (libc::SYS_rmdir, sys_unlink),
    (libc::SYS_unlink, sys_unlink),
    (libc::SYS_unlinkat, sys_unlinkat),
    (libc::SYS_rename, sys_rename),
    (libc::SYS_renameat, sys_renameat),
    (libc::SYS_link, sys_link),
    (libc::SYS_linkat, sys_linkat),
    (libc::SYS_symlink, sys_symlink),
    (libc::SYS_splice, sys_splice),
];

/// Syscalls audited as irrelevant to the file-effect model.
static IGNORED: &[c_long] = &[
    libc::SYS_poll,
    libc::SYS_lseek,
    libc::SYS_mprotect,
    libc::SYS_munmap,
    libc::SYS_brk,
    libc::SYS_rt_sigaction,
    libc::SYS_rt_sigprocmask,
    libc::SYS_rt_sigreturn,
    libc::SYS_ioctl,
    libc::SYS_select,
    libc::SYS_sched_yield,
    libc::SYS_mremap,
    libc::SYS_msync,
    libc::SYS_mincore,
    libc::SYS_madvise,
    libc::SYS_nanosleep,
    libc::SYS_alarm,
    libc::SYS_setitimer,
    libc::SYS_getpid,
    libc::SYS_connect,
    libc::SYS_sendto,
    libc::SYS_recvfrom,
    libc::SYS_sendmsg,
    libc::SYS_recvmsg,
    libc::SYS_bind,
    libc::SYS_getsockname,
    libc::SYS_getpeername,
    libc::SYS_socketpair,
    libc::SYS_setsockopt,
    libc::SYS_getsockopt,
    libc::SYS_clone,
    libc::SYS_fork,
    libc::SYS_vfork,
    libc::SYS_execve,
    libc::SYS_wait4,
    libc::SYS_uname,
    libc::SYS_flock,
    libc::SYS_fsync,
    libc::SYS_getcwd,
    libc::SYS_chmod,
    libc::SYS_fchmod,
    libc::SYS_chown,
    libc::SYS_umask,
    libc::SYS_gettimeofday,
    libc::SYS_getrlimit,
    libc::SYS_getrusage,
    libc::SYS_sysinfo,
    libc::SYS_times,
    libc::SYS_getuid,
    libc::SYS_getgid,
    libc::SYS_geteuid,
    libc::SYS_getegid,
    libc::SYS_setpgid,
    libc::SYS_getppid,
    libc::SYS_getpgrp,
    libc::SYS_setsid,
    libc::SYS_setreuid,
    libc::SYS_getgroups,
    libc::SYS_rt_sigpending,
    libc::SYS_sigaltstack,
    libc::SYS_personality,
    libc::SYS_statfs,
    libc::SYS_fstatfs,
    libc::SYS_prctl,
    libc::SYS_arch_prctl,
    libc::SYS_setrlimit,
    libc::SYS_gettid,
    libc::SYS_time,
    libc::SYS_futex,
    libc::SYS_sched_setaffinity,
    libc::SYS_sched_getaffinity,
    libc::SYS_set_tid_address,
    libc::SYS_restart_syscall,
    libc::SYS_timer_create,
    libc::SYS_timer_settime,
    libc::SYS_timer_gettime,
    libc::SYS_timer_getoverrun,
    libc::SYS_timer_delete,
    libc::SYS_fadvise64,
    libc::SYS_clock_gettime,
    libc::SYS_clock_getres,
    libc::SYS_exit_group,
    libc::SYS_epoll_wait,
    libc::SYS_epoll_ctl,
    libc::SYS_tgkill,
    libc::SYS_utimes,
    libc::SYS_waitid,
    libc::SYS_fchmodat,
    libc::SYS_pselect6,
    libc::SYS_ppoll,
    libc::SYS_set_robust_list,
    libc::SYS_utimensat,
    libc::SYS_epoll_pwait,
    libc::SYS_prlimit64,
    libc::SYS_sendmmsg,
    libc::SYS_getrandom,
];

static TABLE: Lazy<HashMap<c_long, Slot>> = Lazy::new(|| {
    let mut table = HashMap::with_capacity(EFFECTS.len() + IGNORED.len());
    for &(nr, handler) in EFFECTS {
        table.insert(nr, Slot::Effect(handler));
    }
    for &nr in IGNORED {
        table.insert(nr, Slot::Ignore);
    }
    table
});

/// Table lookup; `None` means the number has never been audited.
pub fn slot(nr: i64) -> Option<Slot> {
    TABLE.get(&(nr as c_long)).copied()
}

/// Interpret one syscall-exit event against a process state.
///
/// Unknown and known-irrelevant numbers record nothing. A handler error
/// is wrapped with the syscall number and the process identity; the
/// driver decides whether that aborts the trace.
pub fn handle_syscall(
    proc: &mut Process,
    mem: &dyn TracerMemory,
    args: &SyscallArgs,
) -> anyhow::Result<()> {
    if args.nr < 0 {
        return Ok(());
    }
    match slot(args.nr) {
        None | Some(Slot::Ignore) => Ok(()),
        Some(Slot::Effect(handler)) => handler(proc, mem, args).with_context(|| {
            format!(
                "syscall {} in process {} ({})",
                args.nr,
                proc.uid(),
                proc.image().display()
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMemory;
    use std::path::PathBuf;

    fn proc() -> Process {
        Process::new(1, 42, PathBuf::from("/usr/bin/cc"), PathBuf::from("/w"))
    }

    fn event(nr: i64, args: [u64; 6], ret: i64) -> SyscallArgs {
        SyscallArgs {
            pid: 42,
            nr,
            args,
            ret,
        }
    }

    #[test]
    fn table_distinguishes_effect_noop_and_absent() {
        assert!(matches!(slot(libc::SYS_read), Some(Slot::Effect(_))));
        assert!(matches!(slot(libc::SYS_mprotect), Some(Slot::Ignore)));
        assert!(slot(100_000).is_none());
    }

    #[test]
    fn no_number_is_both_handled_and_ignored() {
        for (nr, _) in EFFECTS {
            assert!(!IGNORED.contains(nr), "syscall {} listed twice", nr);
        }
    }

    #[test]
    fn unknown_number_is_silently_ignored() {
        let mut p = proc();
        let mem = FakeMemory::new();
        handle_syscall(&mut p, &mem, &event(100_000, [0; 6], 0)).unwrap();
        handle_syscall(&mut p, &mem, &event(-1, [0; 6], 0)).unwrap();
        assert!(p.inputs().is_empty() && p.outputs().is_empty() && p.touched().is_empty());
    }

    #[test]
    fn failed_syscall_records_nothing() {
        let mut p = proc();
        let mem = FakeMemory::new().string(0x1000, "/tmp/a");
        let enoent = -(libc::ENOENT as i64);
        handle_syscall(&mut p, &mem, &event(libc::SYS_open, [0x1000, 0, 0, 0, 0, 0], enoent))
            .unwrap();
        handle_syscall(&mut p, &mem, &event(libc::SYS_read, [3, 0, 0, 0, 0, 0], enoent)).unwrap();
        handle_syscall(&mut p, &mem, &event(libc::SYS_stat, [0x1000, 0, 0, 0, 0, 0], enoent))
            .unwrap();
        assert_eq!(p.fd_count(), 0);
        assert!(p.inputs().is_empty() && p.outputs().is_empty() && p.touched().is_empty());
    }

    #[test]
    fn handler_error_carries_process_context() {
        let mut p = proc();
        let mem = FakeMemory::new();
        let err = handle_syscall(&mut p, &mem, &event(libc::SYS_splice, [0; 6], 0)).unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("/usr/bin/cc"), "missing image in: {msg}");
        assert!(msg.contains("not implemented"), "missing cause in: {msg}");
    }

    #[test]
    fn unknown_fcntl_command_is_an_error() {
        let mut p = proc();
        p.map_fd(3, PathBuf::from("/tmp/a"));
        let mem = FakeMemory::new();
        let err =
            handle_syscall(&mut p, &mem, &event(libc::SYS_fcntl, [3, 0x7777, 0, 0, 0, 0], 0))
                .unwrap_err();
        assert!(format!("{err:#}").contains("unknown fcntl"));
    }
}
