//! Synchronous, buffer-copying, message-typed IPC (spec §4.E).
//!
//! The caller supplies a pointer in its own address space; a real kernel
//! translates it to a physical address before copying. That translation
//! lives on the far side of `ArchContext`/the MMU this crate abstracts
//! away — here `send`/`receive`/`notify` just move a [`Message`] value
//! between two `ProcSlot`s.

use crate::errno::{Errno, KResult};
use crate::kernel::Kernel;
use crate::message::Message;
use crate::proc::ProcFlags;

impl Kernel {
    /// Follows the chain of processes blocked trying to send, starting at
    /// `dst`: if `dst` is itself `SENDING`, it is waiting on
    /// `dst.send_target`, which may in turn be waiting on someone else, and
    /// so on. If that chain ever reaches `src`, granting this `send` would
    /// complete a cycle (spec §4.E: "Deadlock detection traverses the
    /// `sender_q` chain starting at `dst` looking for `src`"). A process is
    /// its own trivial 1-cycle, so a self-send is caught by the same walk.
    fn would_deadlock(&self, src: usize, dst: usize) -> bool {
        if src == dst {
            return true;
        }
        let mut seen = std::collections::HashSet::new();
        let mut cursor = dst;
        loop {
            if cursor == src {
                return true;
            }
            if !seen.insert(cursor) {
                return false;
            }
            match self.procs[cursor].send_target {
                Some(next) if self.procs[cursor].flags.contains(ProcFlags::SENDING) => {
                    cursor = next;
                }
                _ => return false,
            }
        }
    }

    /// Spec §4.E `send`.
    pub fn send(&mut self, src: usize, dst: usize, m: Message) -> KResult<()> {
        if dst >= self.procs.len() || self.procs[dst].state == crate::proc::ProcState::Dead {
            return Err(Errno::Esrch);
        }
        if self.would_deadlock(src, dst) {
            return Err(Errno::Edeadlk);
        }

        if self.ready_to_receive_from(dst, src) {
            self.deliver(dst, src, m);
            Ok(())
        } else {
            self.procs[src].flags.insert(ProcFlags::SENDING);
            self.procs[src].send_target = Some(dst);
            self.procs[src].message = Some(m);
            self.push_sender(dst, src);
            let _ = self.dequeue_schedule(src);
            self.procs[src].state = crate::proc::ProcState::Runnable;
            Ok(())
        }
    }

    /// Spec §4.E `receive`.
    pub fn receive(&mut self, dst: usize) -> KResult<Option<Message>> {
        if let Some(sender) = self.pop_sender_matching(dst, None) {
            let msg = self.procs[sender].message.take().unwrap_or_default();
            self.procs[sender].flags.remove(ProcFlags::SENDING);
            self.procs[sender].send_target = None;
            self.enqueue_schedule_head(sender);
            Ok(Some(msg))
        } else {
            self.procs[dst].flags.insert(ProcFlags::RECEIVING);
            let _ = self.dequeue_schedule(dst);
            Ok(None)
        }
    }

    /// Spec §4.E `sendrec`: a `send` immediately followed by a `receive`
    /// that only accepts a reply from `peer`. If the `send` half itself
    /// has to block (`peer` wasn't already waiting), the process stays
    /// `SENDING` and the receive half starts once that delivers — driving
    /// that handoff is the scheduler's job, triggered the same way any
    /// other unblock is, so here it only marks which peer the eventual
    /// receive must gate on.
    pub fn sendrec(&mut self, src: usize, peer: usize, m: Message) -> KResult<Option<Message>> {
        self.send(src, peer, m)?;
        self.procs[src].receive_from = Some(peer);
        if self.procs[src].flags.contains(ProcFlags::SENDING) {
            return Ok(None);
        }
        if let Some(sender) = self.pop_sender_matching(src, Some(peer)) {
            let msg = self.procs[sender].message.take().unwrap_or_default();
            self.procs[sender].flags.remove(ProcFlags::SENDING);
            self.procs[sender].send_target = None;
            self.procs[src].receive_from = None;
            self.enqueue_schedule_head(sender);
            Ok(Some(msg))
        } else {
            self.procs[src].flags.insert(ProcFlags::RECEIVING);
            let _ = self.dequeue_schedule(src);
            Ok(None)
        }
    }

    /// Spec §4.E `notify`: non-blocking, delivers only if `dst` is already
    /// `RECEIVING`. Per the Open Question on `REJECT` semantics, a
    /// non-receiving target without `REJECT` set simply drops the
    /// notification; `REJECT` is reserved for a caller that wants to stay
    /// queued instead, not yet exercised by any syscall in scope.
    pub fn notify(&mut self, src: usize, dst: usize, m: Message) -> KResult<()> {
        if dst >= self.procs.len() || self.procs[dst].state == crate::proc::ProcState::Dead {
            return Err(Errno::Esrch);
        }
        if self.ready_to_receive_from(dst, src) {
            self.deliver(dst, src, m);
        }
        Ok(())
    }

    /// `dst` is waiting, and either waiting for anyone or waiting
    /// specifically for `src` — the `sendrec` peer gate (spec §4.E:
    /// "The kernel flags `src` so that only messages from `peer` satisfy
    /// the receive").
    fn ready_to_receive_from(&self, dst: usize, src: usize) -> bool {
        if !self.procs[dst].flags.contains(ProcFlags::RECEIVING) {
            return false;
        }
        match self.procs[dst].receive_from {
            None => true,
            Some(peer) => peer == src,
        }
    }

    /// Copies `m` into `dst`'s buffer, clears its `RECEIVING` flag, and
    /// wakes it at the head of its priority queue so the reply is prompt
    /// (spec §4.D: "unblocking enqueues it at the head of its priority
    /// queue").
    fn deliver(&mut self, dst: usize, _src: usize, m: Message) {
        self.procs[dst].flags.remove(ProcFlags::RECEIVING);
        self.procs[dst].receive_from = None;
        self.procs[dst].message = Some(m);
        self.enqueue_schedule_head(dst);
    }

    /// Pops `dst`'s sender queue head, optionally requiring it to match
    /// `only_from` (the `sendrec` peer-gating rule).
    fn pop_sender_matching(&mut self, dst: usize, only_from: Option<usize>) -> Option<usize> {
        match only_from {
            None => self.pop_sender(dst),
            Some(peer) => {
                if self.procs[dst].sender_q.head() == Some(peer) {
                    self.pop_sender(dst)
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn(k: &mut Kernel) -> usize {
        let idx = k.get_free_slot().unwrap();
        k.procs[idx].state = crate::proc::ProcState::Runnable;
        idx
    }

    #[test]
    fn send_to_unknown_dst_is_esrch() {
        let mut k = Kernel::new(4, 64);
        let src = spawn(&mut k);
        assert_eq!(k.send(src, 99, Message::new(1)), Err(Errno::Esrch));
    }

    #[test]
    fn self_send_is_deadlock() {
        let mut k = Kernel::new(4, 64);
        let src = spawn(&mut k);
        assert_eq!(k.send(src, src, Message::new(1)), Err(Errno::Edeadlk));
    }

    #[test]
    fn send_to_receiving_dst_delivers_immediately() {
        let mut k = Kernel::new(4, 64);
        let src = spawn(&mut k);
        let dst = spawn(&mut k);
        k.receive(dst).unwrap();
        assert!(k.procs[dst].flags.contains(ProcFlags::RECEIVING));
        k.send(src, dst, Message::new(42)).unwrap();
        assert!(!k.procs[dst].flags.contains(ProcFlags::RECEIVING));
        assert_eq!(k.procs[dst].message.unwrap().m_type, 42);
    }

    #[test]
    fn send_to_busy_dst_blocks_sender_on_sender_queue() {
        let mut k = Kernel::new(4, 64);
        let src = spawn(&mut k);
        let dst = spawn(&mut k);
        k.send(src, dst, Message::new(7)).unwrap();
        assert!(k.procs[src].flags.contains(ProcFlags::SENDING));
        assert_eq!(k.procs[dst].sender_q.head(), Some(src));
    }

    #[test]
    fn receive_drains_queued_sender_and_wakes_it() {
        let mut k = Kernel::new(4, 64);
        let src = spawn(&mut k);
        let dst = spawn(&mut k);
        k.send(src, dst, Message::new(7)).unwrap();
        let got = k.receive(dst).unwrap();
        assert_eq!(got.unwrap().m_type, 7);
        assert!(!k.procs[src].flags.contains(ProcFlags::SENDING));
    }

    #[test]
    fn two_party_deadlock_is_detected() {
        let mut k = Kernel::new(4, 64);
        let a = spawn(&mut k);
        let b = spawn(&mut k);
        // a blocks sending to b.
        k.send(a, b, Message::new(1)).unwrap();
        // b now tries to send to a, which is only reachable through a
        // cycle back through b's own sender_q.
        assert_eq!(k.send(b, a, Message::new(2)), Err(Errno::Edeadlk));
    }

    #[test]
    fn sendrec_only_accepts_reply_from_peer() {
        let mut k = Kernel::new(4, 64);
        let src = spawn(&mut k);
        let peer = spawn(&mut k);
        let stranger = spawn(&mut k);
        k.receive(peer).unwrap();
        // stranger queues up on src first; sendrec must not accept it.
        k.send(stranger, src, Message::new(99)).unwrap();
        let got = k.sendrec(src, peer, Message::new(1));
        assert_eq!(got, Ok(None));
        assert!(k.procs[src].flags.contains(ProcFlags::RECEIVING));
    }

    #[test]
    fn sendrec_stays_sending_when_the_send_half_blocks() {
        let mut k = Kernel::new(4, 64);
        let src = spawn(&mut k);
        let peer = spawn(&mut k);
        // peer is not receiving, so the send half of sendrec blocks; the
        // process must not also claim to be receiving yet.
        let got = k.sendrec(src, peer, Message::new(1));
        assert_eq!(got, Ok(None));
        assert!(k.procs[src].flags.contains(ProcFlags::SENDING));
        assert!(!k.procs[src].flags.contains(ProcFlags::RECEIVING));
    }

    #[test]
    fn notify_drops_silently_when_dst_not_receiving() {
        let mut k = Kernel::new(4, 64);
        let src = spawn(&mut k);
        let dst = spawn(&mut k);
        assert_eq!(k.notify(src, dst, Message::new(5)), Ok(()));
        assert!(k.procs[dst].message.is_none());
    }

    #[test]
    fn notify_delivers_when_dst_is_receiving() {
        let mut k = Kernel::new(4, 64);
        let src = spawn(&mut k);
        let dst = spawn(&mut k);
        k.receive(dst).unwrap();
        k.notify(src, dst, Message::new(5)).unwrap();
        assert_eq!(k.procs[dst].message.unwrap().m_type, 5);
    }
}
