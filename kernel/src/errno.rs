//! Kernel error codes (spec §6, §7).
//!
//! `OK`/`ERR` from the original C become idiomatic `Result<T, Errno>`.
//! `SUSPEND` is not an error: a suspending syscall returns
//! `Ok(SyscallOutcome::Suspended)` (see [`crate::syscall`]) rather than
//! surfacing through this type, since "no reply yet" is success from the
//! dispatcher's point of view.

use thiserror::Error;

/// Kernel-level result alias.
pub type KResult<T> = Result<T, Errno>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    #[error("invalid argument")]
    Einval,
    #[error("no such process")]
    Esrch,
    #[error("resource deadlock would occur")]
    Edeadlk,
    #[error("out of memory")]
    Enomem,
    #[error("broken pipe")]
    Epipe,
    #[error("bad file descriptor")]
    Ebadf,
    #[error("no such file or directory")]
    Enoent,
    #[error("interrupted system call")]
    Eintr,
}
