//! Process creation, fork/exec, and exit (spec §4.C).

use crate::bitmap::{PageBitmap, Policy};
use crate::errno::{Errno, KResult};
use crate::kernel::Kernel;
use crate::message::ProcName;
use crate::param::{
    DEFAULT_KERNEL_QUANTUM, DEFAULT_USER_QUANTUM, KERNEL_STACK_PAGES, MIN_BSS_SIZE, PAGE_SIZE,
    STACK_MAGIC,
};
use crate::proc::ProcState;

/// A freshly laid-out user image's section boundaries, returned by
/// [`Kernel::start_user_proc`] for callers (e.g. `simctl`) that want to
/// report them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    pub rbase: usize,
    pub stack_top: usize,
    pub heap_break: usize,
    pub heap_bottom: usize,
    pub sp: usize,
}

impl Kernel {
    /// Creates a kernel task: full access to physical memory, a stack in
    /// the high region, and a larger quantum than user processes. Spec
    /// §4.C `start_kernel_proc`.
    pub fn start_kernel_proc(
        &mut self,
        entry: usize,
        priority: usize,
        name: &str,
    ) -> KResult<usize> {
        let idx = self.get_free_slot().ok_or(Errno::Enomem)?;
        let stack_start = self
            .mem_map
            .allocate(KERNEL_STACK_PAGES, Policy::High)
            .map_err(|e| {
                self.free_slot(idx);
                e
            })?;

        let num_pages = self.mem_map.len();
        let p = &mut self.procs[idx];
        p.name = ProcName::new(name);
        p.priority = priority;
        p.quantum = DEFAULT_KERNEL_QUANTUM;
        p.ticks_left = 0;
        p.rbase = 0;
        p.length = 0;
        // `ProcSlot::dead` leaves `ptable` sized `PROTECTION_TABLE_LEN`
        // bits, not `mem_map.len()` — resize it first, or `fill()` below
        // grants "full access" to only the first 32 pages and `exit`'s
        // `mem_map.xor(&ptable)` only ever touches those same 32 bits,
        // corrupting the global map instead of freeing the real stack run.
        p.ptable = PageBitmap::new(num_pages);
        p.ptable.fill();
        p.sp = entry.max((stack_start + KERNEL_STACK_PAGES) * PAGE_SIZE - 1);
        p.stack_top = stack_start * PAGE_SIZE;
        p.state = ProcState::Runnable;
        self.enqueue_schedule(idx);
        Ok(idx)
    }

    /// Lays out a user image as `text ∥ data ∥ bss ∥ stack ∥ heap`, all
    /// page-aligned and contiguous, and enqueues the process. Spec §4.C
    /// `start_user_proc`.
    ///
    /// `image_len` is the size of `text ∥ data` in bytes; `bss_len` is
    /// zero-filled and padded up to at least [`MIN_BSS_SIZE`]; `stack_len`
    /// and `heap_len` size the remaining two sections. `rbase` is chosen by
    /// the allocator, not the caller: it is the physical base of whatever
    /// free run of pages fits the image, so the page index space backing
    /// `ptable` lines up exactly with byte addresses derived from it (this
    /// is what lets `do_fork`'s `extract_pattern` anchor on `heap_bottom`
    /// and read back the right bits).
    pub fn start_user_proc(
        &mut self,
        image_len: usize,
        bss_len: usize,
        stack_len: usize,
        heap_len: usize,
        entry: usize,
        priority: usize,
        name: &str,
    ) -> KResult<(usize, ImageLayout)> {
        let idx = self.get_free_slot().ok_or(Errno::Enomem)?;
        let bss_len = bss_len.max(MIN_BSS_SIZE);
        let length = image_len + bss_len + stack_len + heap_len;
        let npages = (length + PAGE_SIZE - 1) / PAGE_SIZE;

        let start_page = self.mem_map.allocate(npages, Policy::Normal).map_err(|e| {
            self.free_slot(idx);
            e
        })?;
        let rbase = start_page * PAGE_SIZE;
        let stack_top = rbase + image_len + bss_len;
        let sp = stack_top + stack_len - 1;
        let heap_break = stack_top + stack_len;
        let heap_bottom = heap_break + heap_len - 1;

        let p = &mut self.procs[idx];
        p.name = ProcName::new(name);
        p.priority = priority;
        p.quantum = DEFAULT_USER_QUANTUM;
        p.ticks_left = 0;
        p.rbase = rbase;
        p.length = length;
        p.stack_top = stack_top;
        p.heap_break = heap_break;
        p.heap_bottom = heap_bottom;
        p.sp = sp;
        p.ptable = PageBitmap::new(self.mem_map.len());
        p.ptable.set_nbits(start_page, npages);
        p.state = ProcState::Runnable;
        let _ = entry;
        self.enqueue_schedule(idx);

        Ok((
            idx,
            ImageLayout {
                rbase,
                stack_top,
                heap_break,
                heap_bottom,
                sp,
            },
        ))
    }

    /// Clones `parent` into a fresh slot. Spec §4.C `do_fork`: forbidden for
    /// kernel tasks; finds a free run in the global map with the same shape
    /// as the parent's pages, copies page by page, and retranslates the
    /// parent's saved message pointer into the child's address space.
    ///
    /// The pattern is anchored at `rbase`'s page, per §4.A's own definition
    /// of `extract_pattern` ("returns the run length... starting at a
    /// process's `rbase`"): anchoring at `heap_bottom` instead, as §4.C's
    /// prose literally reads, would extract only the single trailing page
    /// of the image, since `heap_bottom` is the last byte of the footprint,
    /// not its start. Resolved in favor of §4.A's definition, which is the
    /// only reading under which fork actually copies the whole image.
    ///
    /// Returns the child's proc_nr. The caller is responsible for writing
    /// 0 into the child's return-value slot and the child's pid into the
    /// parent's, per the syscall ABI (spec §4.C: "Child is returned from
    /// `fork` with 0; parent with child's pid").
    pub fn do_fork(&mut self, parent: usize) -> KResult<usize> {
        if self.procs[parent].is_kernel_task() {
            return Err(Errno::Einval);
        }

        let anchor_page = self.procs[parent].rbase / PAGE_SIZE;
        let (pattern_len, pattern) = self.procs[parent].ptable.extract_pattern(anchor_page);
        if pattern_len == 0 {
            return Err(Errno::Einval);
        }

        let child = self.get_free_slot().ok_or(Errno::Enomem)?;
        let child_start = self.mem_map.search_free_run(pattern_len, Policy::Normal).map_err(|e| {
            self.free_slot(child);
            e
        })?;

        let parent_rbase = self.procs[parent].rbase;
        let delta = (child_start as isize * PAGE_SIZE as isize) - parent_rbase as isize;

        {
            let parent_proc = self.procs[parent].clone();
            let proc_nr = self.procs[child].proc_nr;
            let pid = self.procs[child].pid;
            self.procs[child] = parent_proc;
            self.procs[child].proc_nr = proc_nr;
            self.procs[child].pid = pid;
        }

        self.mem_map.set_nbits(child_start, pattern_len);
        self.procs[child].ptable = PageBitmap::new(self.mem_map.len());
        self.procs[child].ptable.set_nbits(child_start, pattern_len);

        // Page-by-page copy is a host-memory concern out of scope here
        // (spec §1 abstracts real memory behind `ArchContext`); the shape
        // of the copy is recorded via `pattern` for a collaborator that
        // owns the physical address space.
        let _ = pattern;

        // Every address field the parent carried is relative to its own
        // rbase; rebase each of them onto the child's physical location so
        // `ptable`'s set bits stay in sync with where the child's sections
        // actually are, matching `start_user_proc`'s rule that the
        // allocator's chosen page is the authority for section addresses.
        let rebase = |addr: usize| (addr as isize + delta).max(0) as usize;
        self.procs[child].rbase = rebase(parent_rbase);
        self.procs[child].stack_top = rebase(self.procs[child].stack_top);
        self.procs[child].heap_break = rebase(self.procs[child].heap_break);
        self.procs[child].heap_bottom = rebase(self.procs[child].heap_bottom);
        self.procs[child].sp = rebase(self.procs[child].sp);

        if let Some(mut msg) = self.procs[child].message {
            msg.p1 = rebase(msg.p1);
            msg.p2 = rebase(msg.p2);
            msg.p3 = rebase(msg.p3);
            self.procs[child].message = Some(msg);
        }

        self.procs[child].parent_pid = self.procs[parent].proc_nr as u32;
        self.procs[child].state = ProcState::Runnable;
        self.enqueue_schedule(child);
        Ok(child)
    }

    /// Replaces `idx`'s image in place: frees its current pages, resets to
    /// defaults, and installs a fresh stack under the new entry/priority/
    /// name. Spec §4.C `kexec`.
    pub fn kexec(&mut self, idx: usize, entry: usize, priority: usize, name: &str) -> KResult<()> {
        let mask = self.procs[idx].ptable.clone();
        self.mem_map.xor(&mask);

        let was_kernel = self.procs[idx].is_kernel_task();
        let proc_nr = self.procs[idx].proc_nr;
        let pid = self.procs[idx].pid;
        let parent_pid = self.procs[idx].parent_pid;
        self.procs[idx] = crate::proc::ProcSlot::dead(proc_nr);
        self.procs[idx].pid = pid;
        self.procs[idx].parent_pid = parent_pid;
        self.procs[idx].name = ProcName::new(name);
        self.procs[idx].priority = priority;

        // `ProcSlot::dead` just above left `ptable` sized
        // `PROTECTION_TABLE_LEN` bits; resize it to `mem_map.len()` before
        // recording any pages in it, the same way `start_user_proc` and
        // `start_kernel_proc` do, or the bits set below would land outside
        // the bitmap `exit`'s `mem_map.xor(&ptable)` actually reads.
        let num_pages = self.mem_map.len();
        self.procs[idx].ptable = PageBitmap::new(num_pages);

        if was_kernel {
            let stack_start = self.mem_map.allocate(KERNEL_STACK_PAGES, Policy::High)?;
            self.procs[idx].rbase = 0;
            self.procs[idx].length = 0;
            self.procs[idx].ptable.fill();
            self.procs[idx].quantum = DEFAULT_KERNEL_QUANTUM;
            self.procs[idx].sp = entry.max((stack_start + KERNEL_STACK_PAGES) * PAGE_SIZE - 1);
        } else {
            let stack_start = self.mem_map.allocate(KERNEL_STACK_PAGES, Policy::Normal)?;
            self.procs[idx].rbase = stack_start * PAGE_SIZE;
            self.procs[idx].ptable.set_nbits(stack_start, KERNEL_STACK_PAGES);
            self.procs[idx].quantum = DEFAULT_USER_QUANTUM;
            self.procs[idx].sp = entry;
        }
        self.procs[idx].state = ProcState::Runnable;
        self.enqueue_schedule(idx);
        Ok(())
    }

    /// Releases `idx`'s pages back to the global map, drops it from its
    /// ready queue and from any `sender_q` it's linked into, and cancels its
    /// alarm — everything `end_process`/`do_exit` need before they decide
    /// what happens to the now-vacated slot itself.
    fn release_resources(&mut self, idx: usize) {
        let mask = self.procs[idx].ptable.clone();
        self.mem_map.xor(&mask);

        let _ = self.dequeue_schedule(idx);
        if self.current == Some(idx) {
            self.current = None;
        }
        self.alarms.cancel(idx);

        for other in 0..self.procs.len() {
            if other == idx {
                continue;
            }
            let mut links = crate::proc::SenderLinks {
                table: &mut self.procs,
            };
            let mut q = self.procs[other].sender_q;
            q.remove(&mut links, idx);
            self.procs[other].sender_q = q;
        }
    }

    /// Tears a process down immediately: releases its resources and
    /// returns the slot straight to the free list, with no `ZOMBIE` period
    /// for a parent to reap. Spec §4.C `end_process`: "The process must not
    /// be linked into any other list when called." Used where there is no
    /// exit status to report — a signal's default action, or a kernel task
    /// going away.
    pub fn end_process(&mut self, idx: usize) {
        self.release_resources(idx);
        self.free_slot(idx);
    }

    /// `exit(status)`: releases `idx`'s resources, then either hands the
    /// status straight to a parent already blocked in `wait` or parks the
    /// slot as a `ZOMBIE` for a later `wait` to collect (spec §4.C/§6:
    /// "Exited, awaiting the parent's `wait`"). A process with no live
    /// parent to ever reap it is freed immediately instead of leaking a
    /// permanent zombie slot.
    pub fn do_exit(&mut self, idx: usize, status: i32) {
        self.release_resources(idx);

        let parent_pid = self.procs[idx].parent_pid;
        let parent = if parent_pid == crate::proc::NO_PARENT {
            None
        } else {
            self.procs
                .iter()
                .find(|p| p.pid == parent_pid && p.is_runnable())
                .map(|p| p.proc_nr)
        };

        match parent {
            Some(parent_nr) if self.procs[parent_nr].flags.contains(crate::proc::ProcFlags::WAITING) => {
                let pid = self.procs[idx].pid;
                self.free_slot(idx);
                self.procs[parent_nr].flags.remove(crate::proc::ProcFlags::WAITING);
                let mut reply = crate::message::Message::new(crate::syscall::SYS_WAIT)
                    .with_reply(pid as i32);
                reply.i1 = status;
                self.procs[parent_nr].message = Some(reply);
                self.enqueue_schedule_head(parent_nr);
            }
            Some(_) => {
                self.procs[idx].state = ProcState::Zombie;
                self.procs[idx].exit_status = status;
            }
            None => self.free_slot(idx),
        }
    }

    /// `wait(*status)`: reaps the first `ZOMBIE` child, if one already
    /// exists, returning its pid and exit status. If `caller` has live
    /// children but none have exited yet, blocks until one does. If
    /// `caller` has no children at all, fails `ESRCH` (this crate's fixed
    /// errno set has no `ECHILD`; "no such process" covers it).
    pub fn do_wait(&mut self, caller: usize) -> KResult<Option<(u32, i32)>> {
        let caller_pid = self.procs[caller].pid;
        if let Some(zombie) = self
            .procs
            .iter()
            .find(|p| p.parent_pid == caller_pid && p.state == ProcState::Zombie)
            .map(|p| p.proc_nr)
        {
            let pid = self.procs[zombie].pid;
            let status = self.procs[zombie].exit_status;
            self.free_slot(zombie);
            return Ok(Some((pid, status)));
        }

        let has_living_child = self
            .procs
            .iter()
            .any(|p| p.parent_pid == caller_pid && !matches!(p.state, ProcState::Dead));
        if !has_living_child {
            return Err(Errno::Esrch);
        }

        self.procs[caller].flags.insert(crate::proc::ProcFlags::WAITING);
        let _ = self.dequeue_schedule(caller);
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_kernel_proc_gets_full_page_access() {
        let mut k = Kernel::new(4, 64);
        let idx = k.start_kernel_proc(0x1000, 1, "ktask").unwrap();
        assert_eq!(k.procs[idx].ptable.count_set(), k.procs[idx].ptable.len());
        assert!(k.procs[idx].is_kernel_task());
    }

    /// The per-process bitmap must be the same size as `mem_map`, not the
    /// `PROTECTION_TABLE_LEN`-sized default `ProcSlot::dead` starts with —
    /// otherwise "full access" for a kernel task can't reach pages beyond
    /// `PROTECTION_TABLE_LEN` and `exit`'s `mem_map.xor(&ptable)` would only
    /// ever touch the first `PROTECTION_TABLE_LEN` bits of the global map.
    #[test]
    fn start_kernel_proc_ptable_is_sized_to_mem_map_not_the_default() {
        let mut k = Kernel::new(4, 4096);
        let idx = k.start_kernel_proc(0x1000, 1, "ktask").unwrap();
        assert_eq!(k.procs[idx].ptable.len(), 4096);
        assert!(k.procs[idx].ptable.is_set(4095));
    }

    /// `end_process` on a kernel task must free exactly the high-region
    /// stack pages `start_kernel_proc` allocated, and must not corrupt any
    /// other bit of `mem_map` along the way.
    #[test]
    fn end_process_on_a_kernel_task_frees_only_its_own_stack_pages() {
        let mut k = Kernel::new(4, 64);
        let idx = k.start_kernel_proc(0x1000, 1, "ktask").unwrap();
        assert_eq!(k.mem_map.count_set(), KERNEL_STACK_PAGES);
        k.end_process(idx);
        assert_eq!(k.mem_map.count_set(), 0);
    }

    #[test]
    fn start_user_proc_lays_out_sections_in_order() {
        let mut k = Kernel::new(4, 256);
        let (idx, layout) = k
            .start_user_proc(1024, 0, 256, 256, 0, 3, "init")
            .unwrap();
        assert!(layout.stack_top > k.procs[idx].rbase);
        assert!(layout.heap_break >= layout.stack_top);
        assert!(layout.heap_bottom > layout.heap_break);
        assert_eq!(layout.sp, layout.stack_top + 256 - 1);
    }

    #[test]
    fn fork_is_forbidden_for_kernel_tasks() {
        let mut k = Kernel::new(4, 64);
        let idx = k.start_kernel_proc(0x1000, 1, "ktask").unwrap();
        assert_eq!(k.do_fork(idx), Err(Errno::Einval));
    }

    #[test]
    fn end_process_frees_its_pages_back_to_the_global_map() {
        let mut k = Kernel::new(4, 256);
        let (idx, _) = k.start_user_proc(1024, 0, 256, 256, 0, 3, "init").unwrap();
        assert!(k.mem_map.count_set() > 0);
        k.end_process(idx);
        assert_eq!(k.mem_map.count_set(), 0);
        assert_eq!(k.procs[idx].state, ProcState::Dead);
    }

    #[test]
    fn end_process_removes_pending_sender_link() {
        let mut k = Kernel::new(4, 64);
        let a = k.get_free_slot().unwrap();
        let b = k.get_free_slot().unwrap();
        k.push_sender(b, a);
        k.end_process(a);
        assert_eq!(k.pop_sender(b), None);
    }

    #[test]
    fn fork_copies_the_whole_image_not_just_the_last_page() {
        let mut k = Kernel::new(4, 256);
        let (parent, _) = k.start_user_proc(1024, 0, 256, 256, 0, 3, "init").unwrap();
        let parent_pages = k.procs[parent].ptable.count_set();
        assert!(parent_pages > 1);

        let child = k.do_fork(parent).unwrap();
        assert_eq!(k.procs[child].ptable.count_set(), parent_pages);
    }

    #[test]
    fn fork_rebases_the_childs_address_fields_onto_its_own_pages() {
        let mut k = Kernel::new(4, 256);
        let (parent, _) = k.start_user_proc(1024, 0, 256, 256, 0, 3, "init").unwrap();
        let child = k.do_fork(parent).unwrap();

        let child_start_page = k.procs[child].rbase / crate::param::PAGE_SIZE;
        assert!(k.procs[child].ptable.is_set(child_start_page));
        assert_ne!(k.procs[child].rbase, k.procs[parent].rbase);

        let delta = k.procs[child].rbase as isize - k.procs[parent].rbase as isize;
        assert_eq!(
            k.procs[child].stack_top as isize,
            k.procs[parent].stack_top as isize + delta
        );
        assert_eq!(
            k.procs[child].heap_bottom as isize,
            k.procs[parent].heap_bottom as isize + delta
        );
    }

    #[test]
    fn get_free_slot_assigns_pid_equal_to_proc_nr() {
        let mut k = Kernel::new(4, 64);
        let idx = k.get_free_slot().unwrap();
        assert_eq!(k.procs[idx].pid, idx as u32);
    }

    #[test]
    fn fork_gives_the_child_its_own_pid_not_the_parents() {
        let mut k = Kernel::new(4, 256);
        let (parent, _) = k.start_user_proc(1024, 0, 256, 256, 0, 3, "init").unwrap();
        let child = k.do_fork(parent).unwrap();
        assert_eq!(k.procs[child].pid, child as u32);
        assert_eq!(k.procs[child].parent_pid, parent as u32);
    }

    /// `kexec`'s user branch must record its fresh stack pages in the
    /// process's own `ptable`, not just allocate them in `mem_map` — or
    /// the pages leak at the next `exit` since `ptable` wouldn't name
    /// them, and §8 invariant 3 (ptable bits are a subset of mem_map's)
    /// would report the process owning nothing it was actually granted.
    #[test]
    fn kexec_to_a_user_image_records_its_stack_pages_in_ptable() {
        let mut k = Kernel::new(4, 64);
        let (idx, _) = k.start_user_proc(1024, 0, 256, 256, 0, 3, "init").unwrap();
        k.kexec(idx, 0x2000, 3, "execed").unwrap();

        let stack_page = k.procs[idx].rbase / crate::param::PAGE_SIZE;
        assert!(k.procs[idx].ptable.is_set(stack_page));
        assert_eq!(k.procs[idx].ptable.count_set(), KERNEL_STACK_PAGES);

        let pages_before_exit = k.mem_map.count_set();
        k.end_process(idx);
        assert_eq!(k.mem_map.count_set(), pages_before_exit - KERNEL_STACK_PAGES);
    }

    /// `kexec` on a kernel task stays a kernel task (same high-region
    /// stack allocation); the refreshed `ptable` must be sized to
    /// `mem_map` before `fill()`, not the 32-bit default `ProcSlot::dead`
    /// leaves it at.
    #[test]
    fn kexec_on_a_kernel_task_resizes_ptable_before_filling_it() {
        let mut k = Kernel::new(4, 4096);
        let idx = k.start_kernel_proc(0x1000, 1, "ktask").unwrap();
        k.kexec(idx, 0x2000, 1, "ktask2").unwrap();
        assert_eq!(k.procs[idx].ptable.len(), 4096);
        assert!(k.procs[idx].ptable.is_set(4095));
        assert!(k.procs[idx].is_kernel_task());
    }

    /// `exit` with no parent waiting yet parks the slot as a `ZOMBIE`
    /// carrying its status; a later `wait` reaps it and frees the slot.
    #[test]
    fn exit_then_wait_reaps_the_zombie_and_reports_its_status() {
        let mut k = Kernel::new(4, 256);
        let (parent, _) = k.start_user_proc(1024, 0, 256, 256, 0, 3, "init").unwrap();
        let child = k.do_fork(parent).unwrap();

        k.do_exit(child, 7);
        assert_eq!(k.procs[child].state, ProcState::Zombie);

        let reaped = k.do_wait(parent).unwrap();
        assert_eq!(reaped, Some((child as u32, 7)));
        assert_eq!(k.procs[child].state, ProcState::Dead);
    }

    /// `wait` with no exited child yet blocks the caller; a later `exit`
    /// wakes it immediately with the child's pid and status.
    #[test]
    fn wait_blocks_then_wakes_on_a_later_exit() {
        let mut k = Kernel::new(4, 256);
        let (parent, _) = k.start_user_proc(1024, 0, 256, 256, 0, 3, "init").unwrap();
        let child = k.do_fork(parent).unwrap();

        assert_eq!(k.do_wait(parent), Ok(None));
        assert!(k.procs[parent].flags.contains(crate::proc::ProcFlags::WAITING));

        k.do_exit(child, 3);

        assert!(!k.procs[parent].flags.contains(crate::proc::ProcFlags::WAITING));
        assert_eq!(k.procs[parent].state, ProcState::Runnable);
        let reply = k.procs[parent].message.unwrap();
        assert_eq!(reply.reply_res, child as i32);
        assert_eq!(reply.i1, 3);
        // The zombie was reaped straight away, not left for a second wait.
        assert_eq!(k.procs[child].state, ProcState::Dead);
    }

    /// `wait` with no children at all fails `ESRCH` rather than blocking
    /// forever.
    #[test]
    fn wait_with_no_children_fails_immediately() {
        let mut k = Kernel::new(4, 64);
        let parent = k.get_free_slot().unwrap();
        assert_eq!(k.do_wait(parent), Err(Errno::Esrch));
    }
}
