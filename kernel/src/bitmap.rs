//! Physical page bitmap allocator (spec §4.A).
//!
//! A bit per physical page frame. `normal` allocations first-fit from the
//! low address end; `high` allocations (kernel stacks) first-fit from the
//! high end, so the two policies naturally grow toward each other instead
//! of fragmenting the same end of memory.

use crate::errno::{Errno, KResult};

/// Allocation policy, mirroring `GFP_NORM` / `GFP_HIGH` in the original
/// source's `user_get_free_pages`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Normal,
    High,
}

/// A bit-per-page physical memory map. `npages` is fixed at construction;
/// this plays the role of the original's global `mem_map` when owned by the
/// kernel, and of a per-process shadow `ptable` when owned by a `ProcSlot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBitmap {
    bits: Vec<bool>,
}

impl PageBitmap {
    pub fn new(npages: usize) -> Self {
        PageBitmap {
            bits: vec![false; npages],
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn is_set(&self, page: usize) -> bool {
        self.bits.get(page).copied().unwrap_or(false)
    }

    pub fn set_bit(&mut self, page: usize) {
        self.bits[page] = true;
    }

    pub fn clear_bit(&mut self, page: usize) {
        self.bits[page] = false;
    }

    /// Sets `n` consecutive bits starting at `start`.
    pub fn set_nbits(&mut self, start: usize, n: usize) {
        for page in start..start + n {
            self.bits[page] = true;
        }
    }

    /// Sets every bit (used to give a kernel process full access to every
    /// physical page, per `start_kernel_proc`).
    pub fn fill(&mut self) {
        self.bits.iter_mut().for_each(|b| *b = true);
    }

    /// Flips every bit the mask has set, leaving the rest untouched. Used
    /// by `exit` to remove a process's pages from the global map, and by
    /// `fork` in reverse to add the child's run to the global map.
    pub fn xor(&mut self, mask: &PageBitmap) {
        for (bit, mask_bit) in self.bits.iter_mut().zip(mask.bits.iter()) {
            *bit ^= mask_bit;
        }
    }

    pub fn count_set(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Finds the first (for `Policy::Normal`) or last (for `Policy::High`)
    /// run of `n` contiguous clear bits and returns its starting page.
    pub fn search_free_run(&self, n: usize, policy: Policy) -> KResult<usize> {
        if n == 0 || n > self.bits.len() {
            return Err(Errno::Enomem);
        }
        let candidates: Box<dyn Iterator<Item = usize>> = match policy {
            Policy::Normal => Box::new(0..=self.bits.len() - n),
            Policy::High => Box::new((0..=self.bits.len() - n).rev()),
        };
        for start in candidates {
            if self.bits[start..start + n].iter().all(|b| !*b) {
                return Ok(start);
            }
        }
        Err(Errno::Enomem)
    }

    /// Allocates a contiguous run of `n` pages under `policy`, marks them
    /// set in `self`, and returns the starting page.
    pub fn allocate(&mut self, n: usize, policy: Policy) -> KResult<usize> {
        let start = self.search_free_run(n, policy)?;
        self.set_nbits(start, n);
        Ok(start)
    }

    /// Frees a run of `n` pages starting at `start`.
    pub fn free_run(&mut self, start: usize, n: usize) {
        for page in start..start + n {
            self.bits[page] = false;
        }
    }

    /// Returns the length of the contiguous run of set bits starting at
    /// `anchor` (inclusive), along with a bitmap of that exact shape
    /// anchored at page 0 — the "pattern" `fork` copies onto a fresh
    /// region of the global map. Mirrors `extract_pattern(pbitmap, anchor)`
    /// in spec §4.A: used to find a free run in `mem_map` with the
    /// identical shape as the parent's already-allocated pages.
    pub fn extract_pattern(&self, anchor: usize) -> (usize, PageBitmap) {
        let mut len = 0;
        while anchor + len < self.bits.len() && self.bits[anchor + len] {
            len += 1;
        }
        let mut pattern = PageBitmap::new(len);
        pattern.set_nbits(0, len);
        (len, pattern)
    }
}
