//! WINIX kernel core: process table, scheduler, IPC, signals/alarms, and a
//! physical page bitmap allocator, modeled as one owned [`Kernel`] context
//! instead of file-scope globals so it can run and be tested in user space
//! (spec §9 Design Notes).
//!
//! Hardware specifics — register save/restore, MMU programming, interrupt
//! vectoring — are abstracted behind [`context::ArchContext`]; nothing in
//! this crate assumes a particular architecture or even a particular
//! address space.

pub mod bitmap;
pub mod context;
pub mod errno;
pub mod ipc;
pub mod kernel;
pub mod lifecycle;
pub mod message;
pub mod param;
pub mod proc;
pub mod queue;
pub mod sched;
pub mod signal;
pub mod syscall;

pub use context::{ArchContext, NullContext};
pub use errno::{Errno, KResult};
pub use kernel::{Kernel, PsRow};
pub use message::{Message, ProcName};
pub use proc::{ProcFlags, ProcSlot, ProcState};
pub use syscall::{dispatch, SyscallOutcome, SyscallResult};
