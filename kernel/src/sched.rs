//! Multilevel round-robin scheduler (spec §4.D).
//!
//! `NUM_QUEUES` priorities, lower index runs first. Starvation of lower
//! priorities is permitted by design — this is a teaching kernel, not a
//! fairness-guaranteeing one.

use crate::kernel::Kernel;
use crate::message::ProcName;
use crate::param::{IDLE_PRIORITY, NUM_QUEUES};
use crate::proc::{ProcFlags, ProcState};

impl Kernel {
    /// Lazily creates the idle process the first time it's needed: lowest
    /// priority, always runnable, never linked into a ready queue (spec
    /// §4.D: "Idle process is always runnable, has priority IDLE, and is
    /// never enqueued elsewhere").
    pub fn ensure_idle(&mut self) -> usize {
        if let Some(idx) = self.idle_proc_nr {
            return idx;
        }
        let idx = self
            .get_free_slot()
            .expect("process table has no room for the idle process");
        {
            let p = &mut self.procs[idx];
            p.name = ProcName::new("idle");
            p.priority = IDLE_PRIORITY;
            p.state = ProcState::Runnable;
            p.quantum = i32::MAX;
            p.ticks_left = i32::MAX;
        }
        self.idle_proc_nr = Some(idx);
        idx
    }

    /// Scans `ready_q[0..NUM_QUEUES)` for the first non-empty queue and
    /// removes its head. Falls back to the idle process if every queue is
    /// empty. Spec §4.D `pick_proc`.
    pub fn pick_proc(&mut self) -> usize {
        for priority in 0..NUM_QUEUES {
            let mut links = crate::proc::ProcLinks {
                table: &mut self.procs,
            };
            if let Some(idx) = self.ready_q[priority].pop(&mut links) {
                return idx;
            }
        }
        self.ensure_idle()
    }

    /// One invocation of the scheduler: retires the previously running
    /// process (accounting, requeue), picks the next one, refills its
    /// quantum if needed, and sets it as `current`. Returns the new
    /// current proc_nr. Spec §4.D algorithm, steps 1-3 (context load,
    /// step 4, is the `ArchContext` collaborator's job).
    pub fn schedule(&mut self) -> usize {
        if let Some(prev) = self.current.take() {
            let still_runnable = self.procs[prev].state == ProcState::Runnable
                && !self.procs[prev].flags.intersects(ProcFlags::BLOCKED);
            if still_runnable {
                self.procs[prev].time_used += 1;
                self.procs[prev].ticks_left -= 1;
                let priority = self.procs[prev].priority;
                let mut links = crate::proc::ProcLinks {
                    table: &mut self.procs,
                };
                if self.procs[prev].ticks_left > 0 {
                    self.ready_q[priority].push_head(&mut links, prev);
                } else {
                    self.ready_q[priority].push_tail(&mut links, prev);
                }
            }
        }

        let picked = self.pick_proc();
        if self.procs[picked].ticks_left <= 0 {
            self.procs[picked].ticks_left = self.procs[picked].quantum;
        }
        self.procs[picked].state = ProcState::Runnable;
        self.current = Some(picked);
        log::trace!(
            "schedule: proc_nr={} priority={} ticks_left={}",
            picked,
            self.procs[picked].priority,
            self.procs[picked].ticks_left
        );
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::USER_PRIORITY;

    fn spawn(k: &mut Kernel, priority: usize, quantum: i32) -> usize {
        let idx = k.get_free_slot().unwrap();
        k.procs[idx].priority = priority;
        k.procs[idx].quantum = quantum;
        k.procs[idx].ticks_left = quantum;
        k.enqueue_schedule(idx);
        idx
    }

    #[test]
    fn idle_runs_when_no_queue_has_work() {
        let mut k = Kernel::new(4, 64);
        let picked = k.schedule();
        assert_eq!(Some(picked), k.idle_proc_nr);
    }

    #[test]
    fn higher_priority_preempts_lower() {
        let mut k = Kernel::new(6, 64);
        let low = spawn(&mut k, USER_PRIORITY, 10);
        let high = spawn(&mut k, 0, 10);
        let _ = low;
        assert_eq!(k.schedule(), high);
    }

    #[test]
    fn exhausted_quantum_goes_to_queue_tail_not_head() {
        let mut k = Kernel::new(6, 64);
        let a = spawn(&mut k, USER_PRIORITY, 1);
        let b = spawn(&mut k, USER_PRIORITY, 5);
        assert_eq!(k.schedule(), a);
        // a's single tick is consumed; b was already queued behind it.
        assert_eq!(k.schedule(), b);
        // a goes to the tail since it ran out of ticks, so idle/b's
        // requeue order keeps a behind any freshly queued work.
        let c = spawn(&mut k, USER_PRIORITY, 5);
        assert_eq!(k.schedule(), c);
    }

    #[test]
    fn remaining_quantum_reinserts_at_head_for_prompt_resumption() {
        let mut k = Kernel::new(6, 64);
        let a = spawn(&mut k, USER_PRIORITY, 5);
        let b = spawn(&mut k, USER_PRIORITY, 5);
        assert_eq!(k.schedule(), a);
        // a still has ticks left, so when b becomes current next, a must
        // be waiting at the head of the queue, not behind any third proc.
        assert_eq!(k.schedule(), a);
        let _ = b;
    }

    #[test]
    fn ticks_left_never_exceeds_quantum() {
        let mut k = Kernel::new(6, 64);
        let a = spawn(&mut k, USER_PRIORITY, 3);
        for _ in 0..10 {
            k.schedule();
            assert!(k.procs[a].ticks_left <= k.procs[a].quantum);
            assert!(k.procs[a].ticks_left >= 0);
        }
    }
}
