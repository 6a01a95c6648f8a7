//! Compatibility-bearing constants for the process table, scheduler and
//! memory layout. These values are part of the kernel's on-disk/ABI-ish
//! contract (spec §6) and must not be changed casually.

/// Size of the fixed process table.
pub const NUM_PROCS: usize = 20;

/// Number of scheduling priority queues.
pub const NUM_QUEUES: usize = 5;

/// Maximum length of a printable process name, not including a terminator.
pub const PROC_NAME_LEN: usize = 20;

/// Number of bits in a per-process page protection bitmap.
pub const PROTECTION_TABLE_LEN: usize = 32;

/// Default timeslice, in ticks, for a freshly scheduled user process.
pub const DEFAULT_USER_QUANTUM: i32 = 100;

/// Kernel processes get a larger timeslice than user processes.
pub const DEFAULT_KERNEL_QUANTUM: i32 = 200;

/// Page size in bytes (spec §6: "page size 1024 bytes").
pub const PAGE_SIZE: usize = 1024;

/// Minimum bss size carved out for a user image, in bytes.
pub const MIN_BSS_SIZE: usize = PAGE_SIZE;

/// Number of pages reserved for a kernel process's stack.
pub const KERNEL_STACK_PAGES: usize = 2;

/// Value written to the first word of a stack region so a clobbered guard
/// word can be detected as stack overflow.
pub const STACK_MAGIC: usize = 0xDEAD_C0DE;

/// Priority bands, lower numeric value runs first (spec §4.D).
pub const SYSTEM_PRIORITY: usize = 0;
pub const KERNEL_PRIORITY: usize = 1;
pub const USER_PRIORITY: usize = 3;
pub const IDLE_PRIORITY: usize = 4;

/// `do_kill` refuses signals aimed at proc_nr 0 or 1 (the kernel's own
/// idle/init processes), mirroring `kernel/system/sys_kill.c` in the
/// original source.
pub const LOWEST_KILLABLE_PROC_NR: usize = 2;
