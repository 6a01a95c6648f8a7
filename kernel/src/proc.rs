//! The process table entry and its lifecycle states (spec §3).

use bitflags::bitflags;

use crate::bitmap::PageBitmap;
use crate::message::{Message, ProcName};
use crate::param::{DEFAULT_USER_QUANTUM, PROTECTION_TABLE_LEN};
use crate::queue::Links;
use crate::signal::SignalState;

/// State of a process slot (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    /// On the free list; the slot is unused.
    Dead,
    /// Allocated but not yet runnable (between `get_free_slot` and being
    /// enqueued for the first time).
    Initialising,
    /// On a ready queue, or currently running.
    Runnable,
    /// Exited, awaiting the parent's `wait`.
    Zombie,
}

bitflags! {
    /// IPC state bits (spec §3, §4.E). `REJECT` marks a process that should
    /// stay queued on `notify` rather than have the notification dropped
    /// (spec §9 Open Questions: unless product requirements say otherwise,
    /// `notify` drops silently when the target is not `RECEIVING`; `REJECT`
    /// is reserved for a future policy and currently only gates that one
    /// branch, see [`crate::ipc::notify`]).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcFlags: u8 {
        const SENDING      = 0b0001;
        const RECEIVING    = 0b0010;
        const REJECT       = 0b0100;
        /// Blocked in `sigsuspend`, waiting for any unblocked signal to
        /// become deliverable (spec §4.F).
        const AWAIT_SIGNAL = 0b01000;
        /// Blocked in `wait`, waiting for any child to become a `ZOMBIE`.
        const WAITING      = 0b10000;
        /// Every flag that means "off the ready queue, not actually
        /// running right now" even though `state` still reads `RUNNABLE`
        /// (spec §3 has no separate BLOCKED state; blocking is modeled
        /// as these flags on a nominally-RUNNABLE slot). `schedule` tests
        /// against this mask, not the individual flags, so a new kind of
        /// block only has to be added here to be handled correctly.
        const BLOCKED = Self::SENDING.bits() | Self::RECEIVING.bits()
            | Self::AWAIT_SIGNAL.bits() | Self::WAITING.bits();
    }
}

/// Sentinel `parent_pid` for a process with no parent to report to: one
/// created directly by `start_kernel_proc`/`start_user_proc` rather than by
/// `do_fork`. Plain `0` would be ambiguous with a real process occupying
/// slot 0 (since `pid` is assigned as `proc_nr`, slot 0's pid is legitimately
/// `0`), so `exit`/`wait` need a value no live process can ever hold.
pub const NO_PARENT: u32 = u32::MAX;

/// One entry in the fixed process table.
#[derive(Debug, Clone)]
pub struct ProcSlot {
    // Identity
    pub proc_nr: usize,
    pub pid: u32,
    pub parent_pid: u32,
    pub name: ProcName,

    // Lifecycle
    pub state: ProcState,

    // Memory image
    pub rbase: usize,
    pub length: usize,
    pub stack_top: usize,
    pub heap_break: usize,
    pub heap_bottom: usize,
    pub sp: usize,
    pub ptable: PageBitmap,

    // Scheduling
    pub priority: usize,
    pub quantum: i32,
    pub ticks_left: i32,
    pub time_used: u64,
    pub next: Option<usize>,

    // IPC
    pub flags: ProcFlags,
    pub message: Option<Message>,
    pub sender_q: crate::queue::Queue,
    pub next_sender: Option<usize>,
    /// While `SENDING`, the proc_nr this process is blocked trying to
    /// reach — how deadlock detection walks the wait-for chain without
    /// re-deriving it from `sender_q` membership (spec §4.E).
    pub send_target: Option<usize>,
    /// When sendrec is in progress, only a reply from this proc_nr
    /// satisfies the pending receive (spec §4.E `sendrec`).
    pub receive_from: Option<usize>,
    /// Set when a blocked syscall (IPC or, notionally, blocking I/O) is
    /// broken by signal delivery rather than completing normally; the
    /// caller's retried syscall reports this instead of a normal reply
    /// (spec §5: "causes the syscall to return `EINTR`").
    pub pending_errno: Option<crate::errno::Errno>,

    // Signals & alarms
    pub signals: SignalState,
    /// Saved blocked mask while `AWAIT_SIGNAL` is set, restored once
    /// `sigsuspend` wakes (spec §4.F: "on return the previous mask is
    /// restored").
    pub sigsuspend_saved_mask: Option<crate::signal::SigSet>,
    /// The most recent signal delivery decision for this process, kept for
    /// introspection (what a trampoline frame would otherwise consume
    /// immediately on real hardware).
    pub last_delivery: Option<crate::signal::Delivery>,
    /// Exit status recorded at `exit`, read back by the reaping `wait`.
    /// Meaningless outside `ProcState::Zombie`.
    pub exit_status: i32,
}

impl ProcSlot {
    /// A freshly DEAD slot, preserving only `proc_nr` as the original
    /// `proc_set_default` preserves it across a `memset(p, 0, ...)`.
    pub fn dead(proc_nr: usize) -> Self {
        ProcSlot {
            proc_nr,
            pid: 0,
            parent_pid: NO_PARENT,
            name: ProcName::default(),
            state: ProcState::Dead,
            rbase: 0,
            length: 0,
            stack_top: 0,
            heap_break: 0,
            heap_bottom: 0,
            sp: 0,
            ptable: PageBitmap::new(PROTECTION_TABLE_LEN),
            priority: 0,
            quantum: DEFAULT_USER_QUANTUM,
            ticks_left: 0,
            time_used: 0,
            next: None,
            flags: ProcFlags::empty(),
            message: None,
            sender_q: crate::queue::Queue::new(),
            next_sender: None,
            send_target: None,
            receive_from: None,
            pending_errno: None,
            signals: SignalState::default(),
            sigsuspend_saved_mask: None,
            last_delivery: None,
            exit_status: 0,
        }
    }

    /// Resets the slot to its default, unallocated-but-present shape,
    /// preserving `proc_nr`. Mirrors `proc_set_default` in
    /// `original_source/kernel/proc.c`.
    pub fn reset_to_default(&mut self) {
        *self = ProcSlot::dead(self.proc_nr);
        self.state = ProcState::Initialising;
    }

    pub fn is_runnable(&self) -> bool {
        self.state == ProcState::Runnable
    }

    /// `true` once a kernel image has been installed: kernel processes have
    /// no rbase/length because they run directly against the kernel's own
    /// address space (spec §4.C `do_fork`: "forbidden when the parent is a
    /// kernel task (length==0 ∨ rbase==0)").
    pub fn is_kernel_task(&self) -> bool {
        self.length == 0 || self.rbase == 0
    }
}

/// Lets [`crate::queue::Queue`] operate on `ProcSlot::next` without the
/// queue module knowing about the process table's shape.
pub struct ProcLinks<'a> {
    pub table: &'a mut [ProcSlot],
}

impl<'a> Links for ProcLinks<'a> {
    fn next(&self, idx: usize) -> Option<usize> {
        self.table[idx].next
    }
    fn set_next(&mut self, idx: usize, next: Option<usize>) {
        self.table[idx].next = next;
    }
}

/// Lets [`crate::queue::Queue`] operate on `ProcSlot::next_sender`, the
/// link used for a target's `sender_q` (spec §3, §4.E).
pub struct SenderLinks<'a> {
    pub table: &'a mut [ProcSlot],
}

impl<'a> Links for SenderLinks<'a> {
    fn next(&self, idx: usize) -> Option<usize> {
        self.table[idx].next_sender
    }
    fn set_next(&mut self, idx: usize, next: Option<usize>) {
        self.table[idx].next_sender = next;
    }
}
