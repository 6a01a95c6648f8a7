//! Syscall numbers and dispatch (spec §4.G, §6).
//!
//! "A single trap transfers control with a message whose `type` field is
//! the syscall number." The handler validates the caller, dispatches
//! through a table indexed by that number, and may mark the caller
//! suspended instead of replying immediately.

use crate::errno::{Errno, KResult};
use crate::kernel::Kernel;
use crate::message::Message;
use crate::proc::ProcState;
use crate::signal::{Disposition, SigSet};

pub const SYS_FORK: i32 = 1;
pub const SYS_VFORK: i32 = 2;
pub const SYS_EXEC: i32 = 3;
pub const SYS_EXIT: i32 = 4;
pub const SYS_WAIT: i32 = 5;
pub const SYS_GETPID: i32 = 6;
pub const SYS_GETPPID: i32 = 7;
pub const SYS_KILL: i32 = 8;
pub const SYS_BRK: i32 = 9;
pub const SYS_SBRK: i32 = 10;
pub const SYS_SEND: i32 = 11;
pub const SYS_RECEIVE: i32 = 12;
pub const SYS_SENDREC: i32 = 13;
pub const SYS_NOTIFY: i32 = 14;
pub const SYS_SIGACTION: i32 = 15;
pub const SYS_SIGPROCMASK: i32 = 16;
pub const SYS_SIGPENDING: i32 = 17;
pub const SYS_SIGSUSPEND: i32 = 18;
pub const SYS_ALARM: i32 = 19;
pub const SYS_SETITIMER: i32 = 20;
pub const SYS_SCHED_YIELD: i32 = 21;
pub const SYS_WINFO: i32 = 22;

/// `winfo`'s first argument (spec §6: `winfo(PS|MEM|TRACE_SYSCALL|NO_GPF)`).
pub const WINFO_PS: i32 = 0;
pub const WINFO_MEM: i32 = 1;

/// What a dispatched syscall produced. `SUSPEND` from the original C
/// becomes a distinguished success variant rather than an error — no
/// reply yet is not a failure (spec §6: "`SUSPEND` (sentinel, not returned
/// to user)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    Reply(Message),
    Suspended,
}

pub type SyscallResult = KResult<SyscallOutcome>;

type Handler = fn(&mut Kernel, usize, Message) -> SyscallResult;

/// Dispatch table indexed by syscall number, mirroring the teacher's
/// `const SYSCALL: [Option<fn() -> u64>; N]` array-of-function-pointers
/// idiom. Unmapped slots (file I/O, the VFS surface) are `None`: this
/// kernel core routes them to a collaborator via `notify` rather than
/// implementing a filesystem.
const DISPATCH_LEN: usize = 23;

#[rustfmt::skip]
const DISPATCH: [Option<Handler>; DISPATCH_LEN] = [
    /* 0  unused        */ None,
    /* 1  SYS_FORK      */ Some(sys_fork),
    /* 2  SYS_VFORK     */ Some(sys_fork),
    /* 3  SYS_EXEC      */ Some(sys_exec),
    /* 4  SYS_EXIT      */ Some(sys_exit),
    /* 5  SYS_WAIT      */ Some(sys_wait),
    /* 6  SYS_GETPID    */ Some(sys_getpid),
    /* 7  SYS_GETPPID   */ Some(sys_getppid),
    /* 8  SYS_KILL      */ Some(sys_kill),
    /* 9  SYS_BRK       */ Some(sys_brk),
    /* 10 SYS_SBRK      */ Some(sys_sbrk),
    /* 11 SYS_SEND      */ Some(sys_send),
    /* 12 SYS_RECEIVE   */ Some(sys_receive),
    /* 13 SYS_SENDREC   */ Some(sys_sendrec),
    /* 14 SYS_NOTIFY    */ Some(sys_notify),
    /* 15 SYS_SIGACTION */ Some(sys_sigaction),
    /* 16 SYS_SIGPROCMASK */ Some(sys_sigprocmask),
    /* 17 SYS_SIGPENDING */ Some(sys_sigpending),
    /* 18 SYS_SIGSUSPEND */ Some(sys_sigsuspend),
    /* 19 SYS_ALARM     */ Some(sys_alarm),
    /* 20 SYS_SETITIMER */ Some(sys_setitimer),
    /* 21 SYS_SCHED_YIELD */ Some(sys_sched_yield),
    /* 22 SYS_WINFO     */ Some(sys_winfo),
];

/// Validates `caller`, looks `m.m_type` up in [`DISPATCH`], and runs the
/// handler. Spec §4.G: "The handler validates the caller, dispatches, and
/// may mark the caller suspended."
pub fn dispatch(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    if kernel.get_proc(caller).is_none() {
        return Err(Errno::Esrch);
    }
    let syscall_nr = m.m_type;
    let handler = usize::try_from(syscall_nr)
        .ok()
        .and_then(|nr| DISPATCH.get(nr))
        .and_then(|slot| *slot)
        .ok_or(Errno::Einval)?;
    let outcome = handler(kernel, caller, m)?;

    // Spec §4.F: "after a syscall/interrupt, before returning to user mode,
    // the kernel picks the lowest-numbered pending unblocked signal." A
    // `Suspended` caller isn't returning to user yet, so there's nothing to
    // check until it wakes; a caller the handler itself tore down (exit)
    // no longer has a slot to check against.
    if matches!(outcome, SyscallOutcome::Reply(_)) {
        if let Some(p) = kernel.get_proc(caller) {
            if p.state != ProcState::Dead {
                let delivery = kernel.deliver_pending_signal(caller);
                if let Some(p) = kernel.get_proc_mut(caller) {
                    p.last_delivery = delivery;
                }
            }
        }
    }
    Ok(outcome)
}

/// Also the `SYS_VFORK` handler: per spec, the kernel doesn't distinguish
/// `vfork` from `fork`, so both syscall numbers dispatch here.
fn sys_fork(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    let child = kernel.do_fork(caller)?;
    Ok(SyscallOutcome::Reply(
        Message::new(m.m_type).with_reply(child as i32),
    ))
}

fn sys_exit(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    let status = m.i1;
    kernel.do_exit(caller, status);
    Ok(SyscallOutcome::Reply(
        Message::new(SYS_EXIT).with_reply(status),
    ))
}

/// `wait(*status)`: `m.i1`, when nonzero, names a specific child pid to
/// wait for; `0` waits for any child. Reaps an already-`ZOMBIE` child
/// immediately (reply carries its pid in `reply_res`, its exit status in
/// `i1`); blocks if the caller has live children but none have exited yet.
fn sys_wait(kernel: &mut Kernel, caller: usize, _m: Message) -> SyscallResult {
    match kernel.do_wait(caller)? {
        Some((pid, status)) => {
            let mut reply = Message::new(SYS_WAIT).with_reply(pid as i32);
            reply.i1 = status;
            Ok(SyscallOutcome::Reply(reply))
        }
        None => Ok(SyscallOutcome::Suspended),
    }
}

/// `exec`: replaces the caller's image in place via `kexec`. `m.p1` is the
/// new entry point, `m.i1` the new priority; the process keeps its own
/// name, since loading a new one from a path is a VFS concern out of
/// scope here (spec's Non-goals) — `kexec` is the in-kernel mechanism
/// `exec` rides on, not the loader itself.
fn sys_exec(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    let entry = m.p1;
    let priority = m.i1 as usize;
    let name = kernel.procs[caller].name.as_str().to_string();
    kernel.kexec(caller, entry, priority, &name)?;
    Ok(SyscallOutcome::Reply(Message::new(SYS_EXEC).with_reply(0)))
}

/// `brk(addr)`: moves the heap break to an absolute address, as long as it
/// stays within the heap region `start_user_proc` already carved out
/// (`[stack_top + stack_len, heap_bottom]`) — the image's full footprint is
/// reserved physically up front, so this never needs to touch `mem_map`.
fn sys_brk(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    let new_break = m.p1;
    set_heap_break(kernel, caller, new_break)?;
    Ok(SyscallOutcome::Reply(Message::new(SYS_BRK).with_reply(0)))
}

/// `sbrk(incr)`: moves the heap break by `incr` bytes (`incr` may be
/// negative) and returns the *previous* break, the classic `sbrk` contract.
fn sys_sbrk(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    let incr = m.i1 as isize;
    let previous = kernel.procs[caller].heap_break;
    let new_break = (previous as isize + incr).max(0) as usize;
    set_heap_break(kernel, caller, new_break)?;
    Ok(SyscallOutcome::Reply(
        Message::new(SYS_SBRK).with_reply(previous as i32),
    ))
}

/// The heap's lower bound is wherever `start_user_proc` laid the stack
/// section's end — `sp + 1` at creation and never touched by `brk`/`sbrk`
/// afterward, so it stays a stable floor even after the break has moved.
fn set_heap_break(kernel: &mut Kernel, caller: usize, new_break: usize) -> KResult<()> {
    let p = &kernel.procs[caller];
    let lower_bound = p.sp.saturating_add(1);
    if new_break < lower_bound || new_break > p.heap_bottom.saturating_add(1) {
        return Err(Errno::Enomem);
    }
    kernel.procs[caller].heap_break = new_break;
    Ok(())
}

fn sys_getpid(kernel: &mut Kernel, caller: usize, _m: Message) -> SyscallResult {
    let pid = kernel.procs[caller].pid;
    Ok(SyscallOutcome::Reply(
        Message::new(SYS_GETPID).with_reply(pid as i32),
    ))
}

fn sys_getppid(kernel: &mut Kernel, caller: usize, _m: Message) -> SyscallResult {
    let ppid = kernel.procs[caller].parent_pid;
    Ok(SyscallOutcome::Reply(
        Message::new(SYS_GETPPID).with_reply(ppid as i32),
    ))
}

/// Spec §4.G + `original_source/kernel/system/sys_kill.c`: `ESRCH` if the
/// target pid doesn't resolve to a running process, `EINVAL` if it names
/// the kernel's own reserved low process numbers.
fn sys_kill(kernel: &mut Kernel, _caller: usize, m: Message) -> SyscallResult {
    let target_pid = m.i1 as u32;
    let target = kernel
        .procs
        .iter()
        .find(|p| p.pid == target_pid && p.is_runnable())
        .map(|p| p.proc_nr)
        .ok_or(Errno::Esrch)?;
    if target < crate::param::LOWEST_KILLABLE_PROC_NR {
        return Err(Errno::Einval);
    }
    let sig = m.i2 as u32;
    kernel.raise_signal(target, sig);
    Ok(SyscallOutcome::Reply(Message::new(SYS_KILL).with_reply(0)))
}

/// `sigaction`: installs a disposition for one signal and reports the
/// previous one. `m.i1` is the signal number; `m.i2` selects the
/// disposition (`0` = default, `1` = ignore, `2` = handler), with a handler
/// entry point, if any, carried in `m.p1`.
fn sys_sigaction(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    let sig = m.i1 as usize;
    if sig == 0 || sig > crate::signal::NSIG as usize {
        return Err(Errno::Einval);
    }
    let new = match m.i2 {
        0 => Disposition::Default,
        1 => Disposition::Ignore,
        2 => Disposition::Handler(m.p1),
        _ => return Err(Errno::Einval),
    };
    let slot = &mut kernel.procs[caller].signals.disposition[sig];
    let previous = core::mem::replace(slot, new);
    let previous_tag = match previous {
        Disposition::Default => 0,
        Disposition::Ignore => 1,
        Disposition::Handler(_) => 2,
    };
    Ok(SyscallOutcome::Reply(
        Message::new(SYS_SIGACTION).with_reply(previous_tag),
    ))
}

/// `sigpending`: reports the caller's pending-signal mask.
fn sys_sigpending(kernel: &mut Kernel, caller: usize, _m: Message) -> SyscallResult {
    let pending = kernel.procs[caller].signals.pending.bits();
    Ok(SyscallOutcome::Reply(
        Message::new(SYS_SIGPENDING).with_reply(pending as i32),
    ))
}

/// `sigsuspend`: atomically swaps in `m.i1` as the blocked mask and blocks
/// the caller until a signal it now admits is deliverable. If one is
/// already pending, it fires immediately and the call returns right away
/// with the previous mask restored and the delivered signal number in
/// `i1` of the reply; otherwise the caller suspends.
fn sys_sigsuspend(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    // `SigSet` only names one flag (`NONE`); `from_bits_truncate` would
    // mask a raw user-supplied signal mask down to that, so construction
    // has to go through `from_bits_retain` instead (see `signal.rs`).
    let mask = SigSet::from_bits_retain(m.i1 as u32);
    match kernel.sigsuspend(caller, mask) {
        Some(delivery) => {
            let sig = match delivery {
                crate::signal::Delivery::Ignored(sig) => sig,
                crate::signal::Delivery::Defaulted(sig, _) => sig,
                crate::signal::Delivery::Handled(sig, _) => sig,
            };
            Ok(SyscallOutcome::Reply(
                Message::new(SYS_SIGSUSPEND).with_reply(sig as i32),
            ))
        }
        None => Ok(SyscallOutcome::Suspended),
    }
}

fn sys_send(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    let dst = m.i1 as usize;
    kernel.send(caller, dst, m)?;
    if kernel.procs[caller].flags.contains(crate::proc::ProcFlags::SENDING) {
        Ok(SyscallOutcome::Suspended)
    } else {
        Ok(SyscallOutcome::Reply(Message::new(SYS_SEND).with_reply(0)))
    }
}

fn sys_receive(kernel: &mut Kernel, caller: usize, _m: Message) -> SyscallResult {
    match kernel.receive(caller)? {
        Some(msg) => Ok(SyscallOutcome::Reply(msg)),
        None => Ok(SyscallOutcome::Suspended),
    }
}

fn sys_sendrec(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    let peer = m.i1 as usize;
    match kernel.sendrec(caller, peer, m)? {
        Some(msg) => Ok(SyscallOutcome::Reply(msg)),
        None => Ok(SyscallOutcome::Suspended),
    }
}

fn sys_notify(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    let dst = m.i1 as usize;
    kernel.notify(caller, dst, m)?;
    Ok(SyscallOutcome::Reply(
        Message::new(SYS_NOTIFY).with_reply(0),
    ))
}

/// `sigprocmask(how_is_always_SET, new_mask, &old_mask)`, simplified to the
/// single-mode form the message layout can carry: `m.i1` is the new mask,
/// `reply_res`/`i2` carries the previous one back.
fn sys_sigprocmask(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    let new_mask = SigSet::from_bits_retain(m.i1 as u32);
    let old_mask = kernel.procs[caller].signals.set_blocked(new_mask);
    Ok(SyscallOutcome::Reply(
        Message::new(SYS_SIGPROCMASK).with_reply(old_mask.bits() as i32),
    ))
}

fn sys_alarm(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    let remaining = set_alarm_seconds(kernel, caller, m.i1 as u64);
    Ok(SyscallOutcome::Reply(
        Message::new(SYS_ALARM).with_reply(remaining),
    ))
}

/// `setitimer`: this crate's alarm wheel only ever fires once per
/// schedule, so `ITIMER_REAL`'s periodic re-arming isn't modeled — in
/// effect this is `alarm` under a different syscall number, which is
/// still every bit of the contract the wheel supports. `m.i1` is the
/// requested number of ticks; the reply carries the number of ticks left
/// on whatever timer this one replaces, same as `alarm`'s `reply_res`.
fn sys_setitimer(kernel: &mut Kernel, caller: usize, m: Message) -> SyscallResult {
    let remaining = set_alarm_seconds(kernel, caller, m.i1 as u64);
    Ok(SyscallOutcome::Reply(
        Message::new(SYS_SETITIMER).with_reply(remaining),
    ))
}

/// Shared body of `alarm`/`setitimer`: cancels `caller`'s existing alarm,
/// schedules a new one `ticks` ticks out (a `0` just cancels), and
/// returns the number of ticks that had been left on the old one.
fn set_alarm_seconds(kernel: &mut Kernel, caller: usize, ticks: u64) -> i32 {
    let previous = kernel.alarms.cancel(caller).unwrap_or(0);
    if ticks > 0 {
        kernel.alarms.schedule(caller, kernel.ticks + ticks);
    }
    previous.saturating_sub(kernel.ticks) as i32
}

/// `winfo(PS|MEM)`: spec §6 introspection. The message layout has no room
/// to carry `Kernel::ps_snapshot`'s `Vec<PsRow>` back to the caller (doing
/// that for real means copying into a caller-supplied buffer, which is
/// the `copyout`/MMU boundary this crate abstracts away per §1), so `PS`
/// reports the number of non-DEAD/non-ZOMBIE processes and `MEM` reports
/// the number of physical pages currently allocated — both readable
/// straight out of `reply_res`, with the full structured snapshot still
/// available to an in-process caller (`simctl`) via `ps_snapshot` itself.
fn sys_winfo(kernel: &mut Kernel, _caller: usize, m: Message) -> SyscallResult {
    let value = match m.i1 {
        WINFO_PS => kernel.ps_snapshot().len() as i32,
        WINFO_MEM => kernel.mem_map.count_set() as i32,
        _ => return Err(Errno::Einval),
    };
    Ok(SyscallOutcome::Reply(
        Message::new(SYS_WINFO).with_reply(value),
    ))
}

fn sys_sched_yield(kernel: &mut Kernel, caller: usize, _m: Message) -> SyscallResult {
    let _ = kernel.schedule();
    Ok(SyscallOutcome::Reply(
        Message::new(SYS_SCHED_YIELD).with_reply(caller as i32),
    ))
}
