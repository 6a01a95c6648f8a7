//! The kernel context: every piece of process-wide mutable state the
//! original kernel kept in file-scope globals, now owned by one struct and
//! threaded through every operation (spec §9 Design Notes: "Model it as one
//! `Kernel` context struct owned by the entry point... this removes
//! implicit globals and makes the kernel testable in user space").

use crate::bitmap::PageBitmap;
use crate::param::NUM_QUEUES;
use crate::proc::{ProcLinks, ProcSlot, SenderLinks};
use crate::queue::Queue;
use crate::signal::AlarmWheel;

/// Owns the process table, its queues, the global physical page map, and
/// the alarm wheel. Every kernel entry point (lifecycle, scheduler, IPC,
/// signals, syscall dispatch) takes `&mut Kernel` instead of touching
/// statics.
pub struct Kernel {
    pub procs: Vec<ProcSlot>,
    pub ready_q: [Queue; NUM_QUEUES],
    pub free_list: Queue,
    pub current: Option<usize>,
    pub mem_map: PageBitmap,
    pub alarms: AlarmWheel,
    /// Monotonic tick counter. No kernel operation advances this on its
    /// own; the driving loop (`simctl`'s trace runner) increments it
    /// directly between calls into the kernel.
    pub ticks: u64,
    /// proc_nr of the lazily-created idle process, once one exists. See
    /// [`crate::sched::Kernel::ensure_idle`].
    pub idle_proc_nr: Option<usize>,
}

impl Kernel {
    /// Builds a kernel with `num_procs` slots (spec's `NUM_PROCS`, normally
    /// [`crate::param::NUM_PROCS`]) and `num_pages` physical pages of
    /// backing memory, all free. Mirrors `init_proc` in
    /// `original_source/kernel/proc.c`: every slot starts `DEAD` and on
    /// the free list, `ready_q` starts empty, `current_proc` starts unset.
    pub fn new(num_procs: usize, num_pages: usize) -> Self {
        let mut procs: Vec<ProcSlot> = (0..num_procs).map(ProcSlot::dead).collect();
        let mut free_list = Queue::new();
        for idx in 0..num_procs {
            let mut links = ProcLinks { table: &mut procs };
            free_list.push_tail(&mut links, idx);
        }
        Kernel {
            procs,
            ready_q: core::array::from_fn(|_| Queue::new()),
            free_list,
            current: None,
            mem_map: PageBitmap::new(num_pages),
            alarms: AlarmWheel::default(),
            ticks: 0,
            idle_proc_nr: None,
        }
    }

    fn links(&mut self) -> ProcLinks<'_> {
        ProcLinks {
            table: &mut self.procs,
        }
    }

    fn sender_links(&mut self) -> SenderLinks<'_> {
        SenderLinks {
            table: &mut self.procs,
        }
    }

    /// Pops a slot off the free list, resets it to defaults (preserving
    /// `proc_nr`), and returns its index. Spec §4.B `get_free_slot`.
    ///
    /// `original_source/kernel/proc.c` has no separate `pid` field at
    /// all — `proc_nr` is the only process identity the kernel itself
    /// tracks. Spec §3 nonetheless lists `pid` alongside `proc_nr` as
    /// "numeric index `proc_nr` (stable, equals array index), `pid`",
    /// which this crate reads as the two being the same value: `pid` is
    /// assigned here, once, as `proc_nr`, rather than invented as a
    /// separate monotonic counter with no grounding in either source.
    pub fn get_free_slot(&mut self) -> Option<usize> {
        let idx = {
            let mut links = self.links();
            self.free_list.pop(&mut links)
        };
        let idx = idx?;
        self.procs[idx].reset_to_default();
        self.procs[idx].pid = idx as u32;
        Some(idx)
    }

    /// Returns a slot by index, bounds-checked. Spec §4.B `get_proc`.
    pub fn get_proc(&self, proc_nr: usize) -> Option<&ProcSlot> {
        self.procs.get(proc_nr)
    }

    pub fn get_proc_mut(&mut self, proc_nr: usize) -> Option<&mut ProcSlot> {
        self.procs.get_mut(proc_nr)
    }

    /// Same as `get_proc`, but only if the slot is currently `RUNNABLE`.
    /// Spec §4.B `get_running_proc`.
    pub fn get_running_proc(&self, proc_nr: usize) -> Option<&ProcSlot> {
        self.get_proc(proc_nr).filter(|p| p.is_runnable())
    }

    /// Appends `idx` to the tail of its priority's ready queue and marks it
    /// `RUNNABLE`. Spec §4.B `enqueue_schedule`.
    pub fn enqueue_schedule(&mut self, idx: usize) {
        self.procs[idx].state = crate::proc::ProcState::Runnable;
        let priority = self.procs[idx].priority;
        let mut links = self.links();
        self.ready_q[priority].push_tail(&mut links, idx);
    }

    /// Same as `enqueue_schedule`, but at the head of the queue — used
    /// when unblocking a process so its reply runs promptly (spec §4.D:
    /// "unblocking enqueues it at the head of its priority queue").
    pub fn enqueue_schedule_head(&mut self, idx: usize) {
        self.procs[idx].state = crate::proc::ProcState::Runnable;
        let priority = self.procs[idx].priority;
        let mut links = self.links();
        self.ready_q[priority].push_head(&mut links, idx);
    }

    /// Removes `idx` from its priority's ready queue in O(n). Spec §4.B
    /// `dequeue_schedule`: returns `Ok(())` or an error if `idx` was not
    /// queued (for example, it was already running and off-queue).
    pub fn dequeue_schedule(&mut self, idx: usize) -> Result<(), crate::errno::Errno> {
        let priority = self.procs[idx].priority;
        let mut links = self.links();
        if self.ready_q[priority].remove(&mut links, idx) {
            Ok(())
        } else {
            Err(crate::errno::Errno::Esrch)
        }
    }

    /// Pushes `idx` onto `target`'s sender queue (spec §4.E `send`).
    pub fn push_sender(&mut self, target: usize, idx: usize) {
        let mut links = self.sender_links();
        // sender_q is owned by the target slot, but Queue is Copy-ish and
        // small, so operate on a local copy and write it back.
        let mut q = self.procs[target].sender_q;
        q.push_tail(&mut links, idx);
        self.procs[target].sender_q = q;
    }

    /// Pops the head of `target`'s sender queue, if any.
    pub fn pop_sender(&mut self, target: usize) -> Option<usize> {
        let mut links = self.sender_links();
        let mut q = self.procs[target].sender_q;
        let popped = q.pop(&mut links);
        self.procs[target].sender_q = q;
        popped
    }

    /// Frees `idx`'s pages back into the global map and puts it back on
    /// the free list. Spec §4.C `end_process`: "The process must not be
    /// linked into any other list when called."
    pub fn free_slot(&mut self, idx: usize) {
        self.procs[idx].state = crate::proc::ProcState::Dead;
        let mut links = self.links();
        self.free_list.push_head(&mut links, idx);
    }

    /// Produces a `ps`-style snapshot of every non-DEAD, non-ZOMBIE
    /// process, supplementing `print_runnable_procs` /
    /// `printProceInfo` from `original_source/kernel/proc.c` with a
    /// structured equivalent (`winfo(PS)`, spec §6) instead of printing
    /// directly.
    pub fn ps_snapshot(&self) -> Vec<PsRow> {
        self.procs
            .iter()
            .filter(|p| !matches!(p.state, crate::proc::ProcState::Dead | crate::proc::ProcState::Zombie))
            .map(|p| PsRow {
                proc_nr: p.proc_nr,
                pid: p.pid,
                parent_pid: p.parent_pid,
                name: p.name.as_str().to_string(),
                rbase: p.rbase,
                priority: p.priority,
                state: p.state,
                flags: p.flags,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsRow {
    pub proc_nr: usize,
    pub pid: u32,
    pub parent_pid: u32,
    pub name: String,
    pub rbase: usize,
    pub priority: usize,
    pub state: crate::proc::ProcState,
    pub flags: crate::proc::ProcFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_kernel_has_every_slot_on_the_free_list() {
        let mut k = Kernel::new(4, 64);
        for _ in 0..4 {
            assert!(k.get_free_slot().is_some());
        }
        assert!(k.get_free_slot().is_none());
    }

    #[test]
    fn get_free_slot_preserves_proc_nr() {
        let mut k = Kernel::new(4, 64);
        let idx = k.get_free_slot().unwrap();
        assert_eq!(k.procs[idx].proc_nr, idx);
    }

    #[test]
    fn dequeue_schedule_reports_error_when_not_queued() {
        let mut k = Kernel::new(4, 64);
        let idx = k.get_free_slot().unwrap();
        assert!(k.dequeue_schedule(idx).is_err());
    }

    #[test]
    fn enqueue_then_dequeue_schedule_round_trips() {
        let mut k = Kernel::new(4, 64);
        let idx = k.get_free_slot().unwrap();
        k.procs[idx].priority = 3;
        k.enqueue_schedule(idx);
        assert_eq!(k.ready_q[3].head(), Some(idx));
        assert!(k.dequeue_schedule(idx).is_ok());
        assert!(k.ready_q[3].is_empty());
    }
}
