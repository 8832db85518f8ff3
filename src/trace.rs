//! ptrace transport: spawns the build command, follows its process tree
//! and feeds every syscall exit through the interpretation core.

use crate::dispatch;
use crate::model::{ProcessReport, SyscallArgs};
use crate::registry::Registry;
use crate::remote::PtraceMemory;
use anyhow::{Context, Result};
use log::{debug, error, warn};
use nix::errno::Errno;
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Blocking trace loop. Runs on a dedicated thread
/// (`tokio::task::spawn_blocking`); finished process records flow out
/// through `tx` as their pids terminate. Returns the root command's exit
/// code.
pub fn run(
    command: &[String],
    tx: mpsc::Sender<ProcessReport>,
    token: CancellationToken,
) -> Result<i32> {
    anyhow::ensure!(!command.is_empty(), "trace: empty command line");

    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..]);
    unsafe {
        cmd.pre_exec(|| {
            ptrace::traceme().map_err(|e| std::io::Error::from_raw_os_error(e as i32))
        });
    }
    let child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {}", command[0]))?;
    let root = Pid::from_raw(child.id() as i32);

    // The exec after traceme stops the child before its first
    // instruction; options must be in place before it resumes.
    waitpid(root, None).context("initial stop")?;
    ptrace::setoptions(
        root,
        Options::PTRACE_O_TRACESYSGOOD
            | Options::PTRACE_O_TRACEFORK
            | Options::PTRACE_O_TRACEVFORK
            | Options::PTRACE_O_TRACECLONE
            | Options::PTRACE_O_TRACEEXEC,
    )
    .context("set ptrace options")?;

    let mut driver = Driver {
        registry: Registry::new(),
        mem: PtraceMemory,
        in_syscall: HashMap::new(),
        tx,
        root: root.as_raw(),
    };

    let image = std::fs::read_link(format!("/proc/{root}/exe"))
        .unwrap_or_else(|_| command[0].clone().into());
    let cwd = std::env::current_dir().context("tracer cwd")?;
    driver.registry.root(root.as_raw(), image, cwd);

    resume(root, None);
    driver.event_loop(&token)
}

struct Driver {
    registry: Registry,
    mem: PtraceMemory,
    /// Per-pid syscall phase: present-and-true between an observed
    /// enter-stop and its exit-stop.
    in_syscall: HashMap<i32, bool>,
    tx: mpsc::Sender<ProcessReport>,
    root: i32,
}

impl Driver {
    fn event_loop(&mut self, token: &CancellationToken) -> Result<i32> {
        let mut exit_code = 0;
        let mut cancelled = false;

        loop {
            if token.is_cancelled() && !cancelled {
                cancelled = true;
                self.kill_all();
            }

            let status = match waitpid(None::<Pid>, None) {
                Ok(status) => status,
                Err(Errno::ECHILD) => break,
                Err(e) => return Err(e).context("waitpid"),
            };

            match status {
                WaitStatus::PtraceSyscall(pid) => {
                    self.on_syscall_stop(pid);
                    resume(pid, None);
                }
                WaitStatus::PtraceEvent(pid, _, event) => {
                    self.on_ptrace_event(pid, event);
                    resume(pid, None);
                }
                WaitStatus::Stopped(pid, sig) => {
                    // Signal-delivery stop; SIGSTOP is the attach stop of
                    // a freshly cloned child and is swallowed.
                    let forward = if sig == Signal::SIGSTOP { None } else { Some(sig) };
                    resume(pid, forward);
                }
                WaitStatus::Exited(pid, code) => {
                    self.on_exit(pid);
                    if pid.as_raw() == self.root {
                        exit_code = code;
                    }
                }
                WaitStatus::Signaled(pid, sig, _) => {
                    self.on_exit(pid);
                    if pid.as_raw() == self.root {
                        exit_code = 128 + sig as i32;
                    }
                }
                _ => {}
            }
        }

        // Anything still registered never reported an exit (e.g. the
        // trace was cancelled); flush it.
        for report in self.registry.drain() {
            let _ = self.tx.blocking_send(report);
        }
        Ok(exit_code)
    }

    fn on_syscall_stop(&mut self, pid: Pid) {
        let raw = pid.as_raw();
        let entering = !self.in_syscall.get(&raw).copied().unwrap_or(false);
        self.in_syscall.insert(raw, entering);
        if entering {
            return;
        }

        let regs = match ptrace::getregs(pid) {
            Ok(regs) => regs,
            Err(e) => {
                warn!("getregs failed for pid {}: {}", raw, e);
                return;
            }
        };
        let args = SyscallArgs {
            pid: raw,
            nr: regs.orig_rax as i64,
            args: [regs.rdi, regs.rsi, regs.rdx, regs.r10, regs.r8, regs.r9],
            ret: regs.rax as i64,
        };

        if !self.registry.contains(raw) {
            self.registry.adopt(raw);
        }
        let proc = self.registry.get_mut(raw).expect("adopted above");
        if let Err(e) = dispatch::handle_syscall(proc, &self.mem, &args) {
            // Keep tracing; one uninterpretable event must not cost the
            // rest of the build's records.
            error!("{e:#}");
        }
    }

    fn on_ptrace_event(&mut self, pid: Pid, event: i32) {
        let raw = pid.as_raw();
        match event {
            libc::PTRACE_EVENT_FORK | libc::PTRACE_EVENT_VFORK | libc::PTRACE_EVENT_CLONE => {
                match ptrace::getevent(pid) {
                    Ok(child) => self.registry.fork(raw, child as i32),
                    Err(e) => warn!("getevent failed for pid {}: {}", raw, e),
                }
            }
            libc::PTRACE_EVENT_EXEC => {
                debug!("pid {} exec", raw);
                self.registry.exec(raw);
            }
            _ => {}
        }
    }

    fn on_exit(&mut self, pid: Pid) {
        let raw = pid.as_raw();
        self.in_syscall.remove(&raw);
        if let Some(report) = self.registry.exit(raw) {
            let _ = self.tx.blocking_send(report);
        }
    }

    fn kill_all(&mut self) {
        for pid in self.registry.pids() {
            let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
        }
    }
}

fn resume(pid: Pid, sig: Option<Signal>) {
    // The pid may have died between stops; nothing to do then.
    if let Err(e) = ptrace::syscall(pid, sig) {
        if e != Errno::ESRCH {
            warn!("resume failed for pid {}: {}", pid, e);
        }
    }
}
