//! Index-based intrusive lists over the process table.
//!
//! The original kernel links processes with a `next` pointer embedded in
//! `struct proc` and head/tail pointers per queue. Per the redesign note in
//! spec §9 ("represent queues as head/tail indices into proc_table rather
//! than pointers"), queues here are head/tail `Option<usize>` pairs, and the
//! link lives in `ProcSlot::next` as `Option<usize>`. This keeps the table
//! a single owned `Vec`/array with no borrow-checker fights, while
//! preserving the O(1) enqueue/dequeue the original's pointer lists gave it.

/// A FIFO of process-table indices, implemented as head/tail indices plus
/// a `next` link carried by the caller's storage (see `ProcSlot::next`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Queue {
    head: Option<usize>,
    tail: Option<usize>,
}

impl Queue {
    pub const fn new() -> Self {
        Queue {
            head: None,
            tail: None,
        }
    }

    pub fn head(&self) -> Option<usize> {
        self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Invariant from spec §3: `head == NULL ⇔ tail == NULL`.
    pub fn well_formed(&self) -> bool {
        self.head.is_none() == self.tail.is_none()
    }
}

/// Queue operations need write access to each slot's `next` link, which a
/// bare `Queue` cannot hold (it only stores head/tail). `LinkedQueue` pairs
/// a `Queue` with a slice of links so the whole intrusive-list contract
/// (enqueue_head/enqueue_tail/dequeue/dequeue_schedule) can be expressed
/// without re-deriving pointer arithmetic at every call site.
pub trait Links {
    fn next(&self, idx: usize) -> Option<usize>;
    fn set_next(&mut self, idx: usize, next: Option<usize>);
}

impl Queue {
    /// Adds `idx` to the tail of the list (spec §4.B `enqueue_tail`).
    pub fn push_tail<L: Links>(&mut self, links: &mut L, idx: usize) {
        links.set_next(idx, None);
        match self.tail {
            None => {
                self.head = Some(idx);
                self.tail = Some(idx);
            }
            Some(tail) => {
                links.set_next(tail, Some(idx));
                self.tail = Some(idx);
            }
        }
    }

    /// Adds `idx` to the head of the list (spec §4.B `enqueue_head`).
    pub fn push_head<L: Links>(&mut self, links: &mut L, idx: usize) {
        match self.head {
            None => {
                links.set_next(idx, None);
                self.head = Some(idx);
                self.tail = Some(idx);
            }
            Some(head) => {
                links.set_next(idx, Some(head));
                self.head = Some(idx);
            }
        }
    }

    /// Removes and returns the head of the list (spec §4.B `dequeue`).
    pub fn pop<L: Links>(&mut self, links: &mut L) -> Option<usize> {
        let head = self.head?;
        if self.head == self.tail {
            self.head = None;
            self.tail = None;
        } else {
            self.head = links.next(head);
        }
        links.set_next(head, None);
        Some(head)
    }

    /// Removes `idx` from anywhere in the list in O(n).
    /// Mirrors `dequeue_schedule` in spec §4.B: returns `true` on success,
    /// `false` if `idx` was not found in this list.
    pub fn remove<L: Links>(&mut self, links: &mut L, idx: usize) -> bool {
        let mut curr = self.head;
        let mut prev: Option<usize> = None;

        while let Some(c) = curr {
            if c == idx {
                let next = links.next(c);
                match prev {
                    None => self.head = next,
                    Some(p) => links.set_next(p, next),
                }
                if self.tail == Some(c) {
                    self.tail = prev;
                }
                links.set_next(c, None);
                return true;
            }
            prev = curr;
            curr = links.next(c);
        }
        false
    }

    /// Walks the list from head, yielding indices in order.
    pub fn iter<'a, L: Links>(&self, links: &'a L) -> QueueIter<'a, L> {
        QueueIter {
            links,
            curr: self.head,
        }
    }
}

pub struct QueueIter<'a, L: Links> {
    links: &'a L,
    curr: Option<usize>,
}

impl<'a, L: Links> Iterator for QueueIter<'a, L> {
    type Item = usize;
    fn next(&mut self) -> Option<usize> {
        let curr = self.curr?;
        self.curr = self.links.next(curr);
        Some(curr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestLinks {
        next: Vec<Option<usize>>,
    }

    impl Links for TestLinks {
        fn next(&self, idx: usize) -> Option<usize> {
            self.next[idx]
        }
        fn set_next(&mut self, idx: usize, next: Option<usize>) {
            self.next[idx] = next;
        }
    }

    #[test]
    fn push_tail_then_pop_is_fifo() {
        let mut links = TestLinks {
            next: vec![None; 4],
        };
        let mut q = Queue::new();
        q.push_tail(&mut links, 0);
        q.push_tail(&mut links, 1);
        q.push_tail(&mut links, 2);
        assert_eq!(q.pop(&mut links), Some(0));
        assert_eq!(q.pop(&mut links), Some(1));
        assert_eq!(q.pop(&mut links), Some(2));
        assert_eq!(q.pop(&mut links), None);
        assert!(q.well_formed());
    }

    #[test]
    fn push_head_resumes_before_queued_work() {
        let mut links = TestLinks {
            next: vec![None; 4],
        };
        let mut q = Queue::new();
        q.push_tail(&mut links, 0);
        q.push_head(&mut links, 1);
        assert_eq!(q.pop(&mut links), Some(1));
        assert_eq!(q.pop(&mut links), Some(0));
    }

    #[test]
    fn remove_from_middle_preserves_order() {
        let mut links = TestLinks {
            next: vec![None; 4],
        };
        let mut q = Queue::new();
        q.push_tail(&mut links, 0);
        q.push_tail(&mut links, 1);
        q.push_tail(&mut links, 2);
        assert!(q.remove(&mut links, 1));
        assert_eq!(q.iter(&links).collect::<Vec<_>>(), vec![0, 2]);
        assert!(q.well_formed());
    }

    #[test]
    fn remove_missing_element_returns_false() {
        let mut links = TestLinks {
            next: vec![None; 4],
        };
        let mut q = Queue::new();
        q.push_tail(&mut links, 0);
        assert!(!q.remove(&mut links, 3));
    }

    #[test]
    fn remove_tail_updates_tail_pointer() {
        let mut links = TestLinks {
            next: vec![None; 4],
        };
        let mut q = Queue::new();
        q.push_tail(&mut links, 0);
        q.push_tail(&mut links, 1);
        assert!(q.remove(&mut links, 1));
        q.push_tail(&mut links, 2);
        assert_eq!(q.iter(&links).collect::<Vec<_>>(), vec![0, 2]);
    }
}
