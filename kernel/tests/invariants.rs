//! Randomized invariant checks that complement the scenario tests: these
//! don't script one specific sequence of events, they throw a pile of
//! arbitrary ones at the kernel and check properties that must hold no
//! matter what arrived.

use proptest::prelude::*;
use winix_kernel::bitmap::{PageBitmap, Policy};
use winix_kernel::param::USER_PRIORITY;
use winix_kernel::proc::ProcLinks;
use winix_kernel::queue::Queue;
use winix_kernel::Kernel;

/// A handful of alloc/free page-bitmap operations should never leave
/// `count_set` disagreeing with the net of what was actually allocated.
#[derive(Debug, Clone, Copy)]
enum BitmapOp {
    Alloc(usize),
    FreeOldest,
}

fn bitmap_op() -> impl Strategy<Value = BitmapOp> {
    prop_oneof![
        (1usize..=6).prop_map(BitmapOp::Alloc),
        Just(BitmapOp::FreeOldest),
    ]
}

proptest! {
    #[test]
    fn bitmap_count_set_matches_outstanding_allocations(ops in prop::collection::vec(bitmap_op(), 0..40)) {
        let mut map = PageBitmap::new(256);
        let mut outstanding: Vec<(usize, usize)> = Vec::new();
        let mut expected = 0usize;

        for op in ops {
            match op {
                BitmapOp::Alloc(n) => {
                    if let Ok(start) = map.allocate(n, Policy::Normal) {
                        outstanding.push((start, n));
                        expected += n;
                    }
                }
                BitmapOp::FreeOldest => {
                    if let Some((start, n)) = outstanding.pop() {
                        map.free_run(start, n);
                        expected -= n;
                    }
                }
            }
            prop_assert_eq!(map.count_set(), expected);
        }
    }
}

/// Queue operations preserve `head.is_none() == tail.is_none()` no matter
/// what sequence of pushes, pops, and removals ran (spec §3's queue
/// invariant).
#[derive(Debug, Clone, Copy)]
enum QueueOp {
    PushTail(usize),
    PushHead(usize),
    Pop,
    Remove(usize),
}

fn queue_op() -> impl Strategy<Value = QueueOp> {
    prop_oneof![
        (0usize..8).prop_map(QueueOp::PushTail),
        (0usize..8).prop_map(QueueOp::PushHead),
        Just(QueueOp::Pop),
        (0usize..8).prop_map(QueueOp::Remove),
    ]
}

proptest! {
    #[test]
    fn queue_stays_well_formed_under_arbitrary_ops(ops in prop::collection::vec(queue_op(), 0..60)) {
        let mut k = Kernel::new(8, 16);
        let mut q = Queue::new();
        let mut present = [false; 8];

        for op in ops {
            match op {
                QueueOp::PushTail(i) => {
                    if !present[i] {
                        let mut links = ProcLinks { table: &mut k.procs };
                        q.push_tail(&mut links, i);
                        present[i] = true;
                    }
                }
                QueueOp::PushHead(i) => {
                    if !present[i] {
                        let mut links = ProcLinks { table: &mut k.procs };
                        q.push_head(&mut links, i);
                        present[i] = true;
                    }
                }
                QueueOp::Pop => {
                    let mut links = ProcLinks { table: &mut k.procs };
                    if let Some(i) = q.pop(&mut links) {
                        present[i] = false;
                    }
                }
                QueueOp::Remove(i) => {
                    let mut links = ProcLinks { table: &mut k.procs };
                    if q.remove(&mut links, i) {
                        present[i] = false;
                    }
                }
            }
            prop_assert!(q.well_formed());
        }
    }
}

/// Driving the scheduler through arbitrary quanta never lets `ticks_left`
/// wander outside `[0, quantum]`, and never leaves the same proc_nr both
/// `current` and sitting on a ready queue at once.
proptest! {
    #[test]
    fn schedule_keeps_ticks_left_bounded_and_current_off_queue(
        quanta in prop::collection::vec(1i32..=8, 1..6),
        rounds in 1usize..30,
    ) {
        let mut k = Kernel::new(quanta.len() + 2, 64);
        let procs: Vec<usize> = quanta
            .iter()
            .map(|&quantum| {
                let idx = k.get_free_slot().unwrap();
                k.procs[idx].priority = USER_PRIORITY;
                k.procs[idx].quantum = quantum;
                k.procs[idx].ticks_left = quantum;
                k.enqueue_schedule(idx);
                idx
            })
            .collect();

        for _ in 0..rounds {
            let picked = k.schedule();
            prop_assert!(k.procs[picked].ticks_left <= k.procs[picked].quantum);
            prop_assert!(k.procs[picked].ticks_left >= 0);

            for &p in &procs {
                if Some(p) == k.current {
                    let priority = k.procs[p].priority;
                    let links = ProcLinks { table: &mut k.procs };
                    let on_queue = k.ready_q[priority].iter(&links).any(|idx| idx == p);
                    prop_assert!(!on_queue);
                }
            }
        }
    }
}
