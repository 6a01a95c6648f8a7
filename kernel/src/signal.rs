//! Per-process signal disposition, pending/blocked masks, and the alarm
//! timer wheel (spec §4.F).
//!
//! Actually running a handler means building a synthetic user frame and
//! trampolining through `sigreturn` on real hardware; that lives on the far
//! side of the `save_context`/`load_context` boundary spec.md abstracts
//! away (§1). This module stops at deciding *which* action a delivery
//! takes and handing back a [`Delivery`] describing it — driving a real
//! user-space trampoline from that is a collaborator's job, not the
//! kernel's.

use bitflags::bitflags;

use crate::proc::ProcFlags;

/// Total number of distinct signal numbers tracked, numbered `1..=NSIG`
/// (signal `0` is conventionally "no signal").
pub const NSIG: u32 = 31;

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGILL: u32 = 4;
pub const SIGTRAP: u32 = 5;
pub const SIGABRT: u32 = 6;
pub const SIGBUS: u32 = 7;
pub const SIGFPE: u32 = 8;
pub const SIGKILL: u32 = 9;
pub const SIGUSR1: u32 = 10;
pub const SIGSEGV: u32 = 11;
pub const SIGUSR2: u32 = 12;
pub const SIGPIPE: u32 = 13;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SigSet: u32 {
        const NONE = 0;
    }
}

impl SigSet {
    pub fn contains_signal(&self, sig: u32) -> bool {
        self.bits() & (1 << sig) != 0
    }
    pub fn add(&mut self, sig: u32) {
        // `from_bits_truncate` would mask this down to the set of *named*
        // flags (just `NONE`), discarding every signal bit — this type uses
        // bitflags as a raw 31-bit signal set, not a small named flag enum,
        // so construction has to go through `from_bits_retain`.
        *self = SigSet::from_bits_retain(self.bits() | (1 << sig));
    }
    pub fn remove_signal(&mut self, sig: u32) {
        *self = SigSet::from_bits_retain(self.bits() & !(1 << sig));
    }
    pub fn lowest_pending_unblocked(&self, blocked: &SigSet) -> Option<u32> {
        (1..=NSIG).find(|&sig| self.contains_signal(sig) && !blocked.contains_signal(sig))
    }
}

/// What disposition a process has registered for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disposition {
    #[default]
    Default,
    Ignore,
    /// Opaque user-space handler entry point; the kernel never calls this
    /// itself, it only reports that a handler delivery is due.
    Handler(usize),
}

/// The default action POSIX assigns a signal when its disposition is
/// `Default` (spec §4.F: "TERM, CORE, IGN, STOP per the table").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAction {
    Terminate,
    DumpCore,
    Ignore,
    Stop,
    Continue,
}

pub fn default_action(sig: u32) -> DefaultAction {
    match sig {
        SIGQUIT | SIGILL | SIGTRAP | SIGABRT | SIGBUS | SIGFPE | SIGSEGV => DefaultAction::DumpCore,
        SIGSTOP => DefaultAction::Stop,
        SIGCONT => DefaultAction::Continue,
        SIGCHLD => DefaultAction::Ignore,
        _ => DefaultAction::Terminate,
    }
}

/// The outcome of delivering one pending signal to a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Ignored(u32),
    Defaulted(u32, DefaultAction),
    Handled(u32, usize),
}

/// Per-process signal bookkeeping.
#[derive(Debug, Clone)]
pub struct SignalState {
    pub disposition: [Disposition; (NSIG + 1) as usize],
    pub pending: SigSet,
    pub blocked: SigSet,
    /// Absolute tick deadline of this process's pending alarm, if any.
    pub alarm_deadline: Option<u64>,
}

impl Default for SignalState {
    fn default() -> Self {
        SignalState {
            disposition: [Disposition::Default; (NSIG + 1) as usize],
            pending: SigSet::default(),
            blocked: SigSet::default(),
            alarm_deadline: None,
        }
    }
}

impl SignalState {
    pub fn raise(&mut self, sig: u32) {
        self.pending.add(sig);
    }

    /// Picks the lowest-numbered pending, unblocked signal and clears it
    /// from `pending`, reporting what should happen to the caller. Returns
    /// `None` if nothing is deliverable right now.
    pub fn deliver_next(&mut self) -> Option<Delivery> {
        let sig = self.pending.lowest_pending_unblocked(&self.blocked)?;
        self.pending.remove_signal(sig);
        let delivery = match self.disposition[sig as usize] {
            Disposition::Ignore => Delivery::Ignored(sig),
            Disposition::Handler(entry) => Delivery::Handled(sig, entry),
            Disposition::Default => Delivery::Defaulted(sig, default_action(sig)),
        };
        Some(delivery)
    }

    pub fn has_deliverable(&self) -> bool {
        self.pending.lowest_pending_unblocked(&self.blocked).is_some()
    }

    /// `sigprocmask(SET, new, &old)`-style swap: returns the previous mask.
    pub fn set_blocked(&mut self, new: SigSet) -> SigSet {
        core::mem::replace(&mut self.blocked, new)
    }
}

/// Sorted (by deadline) singly-linked alarm wheel, indexed by proc_nr.
/// Spec §4.F: "Alarms are a sorted singly‑linked list by absolute
/// deadline; on each clock tick the head is compared to now and fired."
#[derive(Debug, Clone, Default)]
pub struct AlarmWheel {
    /// (deadline, proc_nr) pairs, kept sorted ascending by deadline.
    entries: Vec<(u64, usize)>,
}

impl AlarmWheel {
    pub fn schedule(&mut self, proc_nr: usize, deadline: u64) {
        self.cancel(proc_nr);
        let pos = self.entries.partition_point(|(d, _)| *d <= deadline);
        self.entries.insert(pos, (deadline, proc_nr));
    }

    pub fn cancel(&mut self, proc_nr: usize) -> Option<u64> {
        if let Some(pos) = self.entries.iter().position(|(_, p)| *p == proc_nr) {
            Some(self.entries.remove(pos).0)
        } else {
            None
        }
    }

    /// Pops and returns every proc_nr whose deadline has elapsed as of
    /// `now`, in deadline order.
    pub fn fire_due(&mut self, now: u64) -> Vec<usize> {
        let mut fired = Vec::new();
        while let Some(&(deadline, proc_nr)) = self.entries.first() {
            if deadline > now {
                break;
            }
            self.entries.remove(0);
            fired.push(proc_nr);
        }
        fired
    }
}

impl crate::kernel::Kernel {
    /// Raises `sig` against `proc_nr`. If the target is blocked — on IPC
    /// (`SENDING`/`RECEIVING`) or in `sigsuspend` (`AWAIT_SIGNAL`) — and the
    /// signal is both unblocked and not `Ignore`d, the block is broken
    /// immediately rather than left for the process to notice next time it
    /// runs, matching spec §5: "A signal delivered to a process suspended
    /// on IPC or blocking I/O removes it from the peer's wait queue (if
    /// queued), clears its blocking flag, and causes the syscall to return
    /// `EINTR`."
    pub fn raise_signal(&mut self, proc_nr: usize, sig: u32) {
        self.procs[proc_nr].signals.raise(sig);
        if !self.signal_would_interrupt(proc_nr, sig) {
            return;
        }

        if self.procs[proc_nr].flags.contains(ProcFlags::AWAIT_SIGNAL) {
            self.wake_sigsuspend(proc_nr);
        } else {
            self.interrupt_blocking_call(proc_nr);
        }
    }

    fn signal_would_interrupt(&self, proc_nr: usize, sig: u32) -> bool {
        let p = &self.procs[proc_nr];
        let blocked_on_something = p.flags.intersects(
            ProcFlags::SENDING | ProcFlags::RECEIVING | ProcFlags::AWAIT_SIGNAL,
        );
        blocked_on_something
            && !p.signals.blocked.contains_signal(sig)
            && !matches!(p.signals.disposition[sig as usize], Disposition::Ignore)
    }

    /// Breaks an IPC block for `EINTR`: unlinks from whatever `sender_q` the
    /// process was queued on, clears its blocking flags, records the
    /// pending `EINTR`, and wakes it at its priority head so the
    /// interrupted syscall reports promptly.
    fn interrupt_blocking_call(&mut self, proc_nr: usize) {
        if self.procs[proc_nr].flags.contains(ProcFlags::SENDING) {
            if let Some(target) = self.procs[proc_nr].send_target {
                let mut links = crate::proc::SenderLinks {
                    table: &mut self.procs,
                };
                let mut q = self.procs[target].sender_q;
                q.remove(&mut links, proc_nr);
                self.procs[target].sender_q = q;
            }
        }
        self.procs[proc_nr].flags.remove(
            ProcFlags::SENDING | ProcFlags::RECEIVING | ProcFlags::AWAIT_SIGNAL,
        );
        self.procs[proc_nr].send_target = None;
        self.procs[proc_nr].receive_from = None;
        self.procs[proc_nr].pending_errno = Some(crate::errno::Errno::Eintr);
        self.enqueue_schedule_head(proc_nr);
    }

    /// Wakes a process blocked in `sigsuspend`: delivers the now-deliverable
    /// signal, restores the mask `sigsuspend` saved, and reschedules it.
    fn wake_sigsuspend(&mut self, proc_nr: usize) {
        let saved = self.procs[proc_nr].sigsuspend_saved_mask.take();
        self.procs[proc_nr]
            .flags
            .remove(ProcFlags::AWAIT_SIGNAL);
        let delivery = self.deliver_pending_signal(proc_nr);
        let still_alive = self
            .procs
            .get(proc_nr)
            .is_some_and(|p| p.state != crate::proc::ProcState::Dead);
        if !still_alive {
            return;
        }
        if let Some(mask) = saved {
            self.procs[proc_nr].signals.blocked = mask;
        }
        self.procs[proc_nr].last_delivery = delivery;
        self.enqueue_schedule_head(proc_nr);
    }

    /// Delivery point: pops the lowest-numbered pending unblocked signal for
    /// `proc_nr`, if any, and applies its disposition. Spec §4.F: "after a
    /// syscall/interrupt, before returning to user mode, the kernel picks
    /// the lowest-numbered pending unblocked signal." A `Default`
    /// disposition that terminates or dumps core tears the process down via
    /// `end_process`; `Ignore` and `Handler` are left for the caller to act
    /// on (there is no real user-mode trampoline to build here, per
    /// module docs).
    pub fn deliver_pending_signal(&mut self, proc_nr: usize) -> Option<Delivery> {
        let delivery = self.procs.get_mut(proc_nr)?.signals.deliver_next()?;
        if let Delivery::Defaulted(_, action) = delivery {
            if matches!(action, DefaultAction::Terminate | DefaultAction::DumpCore) {
                self.end_process(proc_nr);
            }
        }
        Some(delivery)
    }

    /// `sigsuspend`: atomically installs `mask` as the blocked set and
    /// suspends the caller until a signal newly unblocked by `mask` is
    /// deliverable, restoring the previous mask once one is (spec §4.F). If
    /// a signal is already deliverable under the new mask, it fires
    /// immediately without ever blocking.
    pub fn sigsuspend(&mut self, proc_nr: usize, mask: SigSet) -> Option<Delivery> {
        let previous = self.procs[proc_nr].signals.set_blocked(mask);
        if self.procs[proc_nr].signals.has_deliverable() {
            let delivery = self.deliver_pending_signal(proc_nr);
            if let Some(p) = self.procs.get_mut(proc_nr) {
                if p.state != crate::proc::ProcState::Dead {
                    p.signals.blocked = previous;
                }
            }
            return delivery;
        }
        self.procs[proc_nr].sigsuspend_saved_mask = Some(previous);
        self.procs[proc_nr]
            .flags
            .insert(ProcFlags::AWAIT_SIGNAL);
        let _ = self.dequeue_schedule(proc_nr);
        None
    }
}
