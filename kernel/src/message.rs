//! Fixed-layout IPC message (spec §6: "Fixed struct with a `type` tag, a
//! `reply_res` field, a union of payload shapes").
//!
//! The original message is a C union of differently-shaped payloads
//! (`m1_i1..i3`, `m1_p1..p3`, ...) keyed by convention on which syscall
//! produced it. Rust has no anonymous union ergonomic enough to keep that
//! shape without `unsafe`, so the payload is flattened into a handful of
//! typed slots wide enough for every syscall in scope here; callers only
//! read the slots their syscall defines, exactly as the original callers
//! only read the union arm their syscall defines.

use crate::param::PROC_NAME_LEN;

/// A syscall trap message, or an IPC payload carried by `send`/`receive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Message {
    /// Syscall number when trapping in; otherwise an application-defined
    /// message type negotiated between sender and receiver.
    pub m_type: i32,
    /// Integer payload slots (`m1_i1..i3` in the original).
    pub i1: i32,
    pub i2: i32,
    pub i3: i32,
    /// Pointer/length payload slots (`m1_p1..p3` in the original); kept as
    /// plain `usize` since this kernel never dereferences user pointers
    /// itself (that is `copyin`/`copyout`'s job, out of scope here).
    pub p1: usize,
    pub p2: usize,
    pub p3: usize,
    /// Written by the kernel when servicing the call; read by the caller
    /// once unblocked.
    pub reply_res: i32,
}

impl Message {
    pub const fn new(m_type: i32) -> Self {
        Message {
            m_type,
            i1: 0,
            i2: 0,
            i3: 0,
            p1: 0,
            p2: 0,
            p3: 0,
            reply_res: 0,
        }
    }

    pub fn with_reply(mut self, reply_res: i32) -> Self {
        self.reply_res = reply_res;
        self
    }
}

/// A fixed-capacity, `Copy`-able process name, used instead of a heap
/// `String` so `ProcSlot` stays POD-ish like the original `char name[20]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcName {
    bytes: [u8; PROC_NAME_LEN],
    len: u8,
}

impl ProcName {
    pub fn new(name: &str) -> Self {
        let mut bytes = [0u8; PROC_NAME_LEN];
        let truncated = &name.as_bytes()[..name.len().min(PROC_NAME_LEN)];
        bytes[..truncated.len()].copy_from_slice(truncated);
        ProcName {
            bytes,
            len: truncated.len() as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl Default for ProcName {
    fn default() -> Self {
        ProcName::new("")
    }
}

impl core::fmt::Display for ProcName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
