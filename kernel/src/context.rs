//! Hardware context switch boundary (spec §1: "Hardware/arch specifics
//! (register save/restore, MMU programming, interrupt vectoring) are out of
//! scope; the kernel exposes `save_context`/`load_context` as a trait
//! boundary a real arch backend implements").
//!
//! A real backend pushes/pops registers and reprograms the MMU; this crate
//! only needs to know *when* a switch happens, not how. Keeping it a trait
//! rather than a concrete type is what makes [`crate::kernel::Kernel`]
//! runnable in a host unit test without any of that machinery, exactly the
//! property spec §9 calls out.

/// Abstracts the one piece of real hardware state a scheduler touches: the
/// saved register set of whichever process isn't currently running.
pub trait ArchContext {
    /// Opaque saved-register blob; the kernel never inspects its contents.
    type Saved;

    /// Saves the currently running process's registers, returning a token
    /// the backend can later hand back to [`ArchContext::load_context`].
    fn save_context(&mut self, proc_nr: usize) -> Self::Saved;

    /// Installs `saved` as the live register state and transfers control.
    /// Does not return until the arch backend switches away again.
    fn load_context(&mut self, proc_nr: usize, saved: &Self::Saved);
}

/// A deterministic, allocation-free `ArchContext` for host-side tests and
/// `simctl`: "saving" and "loading" a context just records which proc_nr
/// was switched, so tests can assert on switch order without any real
/// register state.
#[derive(Debug, Default)]
pub struct NullContext {
    pub switch_log: Vec<(&'static str, usize)>,
}

impl ArchContext for NullContext {
    type Saved = ();

    fn save_context(&mut self, proc_nr: usize) -> Self::Saved {
        self.switch_log.push(("save", proc_nr));
    }

    fn load_context(&mut self, proc_nr: usize, _saved: &Self::Saved) {
        self.switch_log.push(("load", proc_nr));
    }
}
