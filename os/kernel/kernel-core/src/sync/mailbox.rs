//! Bounded lock-free mailbox.
//!
//! Producers reserve a slot by advancing `tail` with a CAS, write the
//! message and publish it by setting the slot's bit in `owned`. The single
//! consumer takes the slot at `head` once its bit is set.
//!
//! `head` and `tail` count modulo twice the capacity, so every index maps to
//! the same slot on each lap and a full ring is told apart from an empty one.
//!
//! The gate tracks "mailbox non-empty" without a lock around the hot path.
//! Every send opens it. A receive that drains what it believes to be the
//! last message closes it speculatively, then re-reads `tail`: a producer
//! that reserved a slot in between makes the consumer reopen the gate. Each
//! receive closes at most once and reopens at most once, so false closes are
//! bounded by the number of receives.

use crate::error::SyscallError;
use crate::object::{Arena, Holder, Ref};
use crate::sync::{Gate, GateMode};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

/// Counters of one mailbox.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MailboxStats {
    pub sends: u64,
    pub receives: u64,
    /// Speculative closes that had to be reverted.
    pub false_closes: u64,
}

#[derive(Default)]
struct Counters {
    sends: AtomicU64,
    receives: AtomicU64,
    false_closes: AtomicU64,
}

pub struct Mailbox {
    capacity: u32,
    slots: Box<[AtomicU64]>,
    owned: AtomicU64,
    head: AtomicU32,
    tail: AtomicU32,
    receiving: AtomicBool,
    orphaned: AtomicBool,
    gate: Ref<Gate>,
    counters: Counters,
}

/// A message taken from the mailbox, with the head index after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Taken {
    pub message: u64,
    pub head: u32,
}

impl Mailbox {
    pub(crate) fn create(arena: &Arc<Arena>, holder: Holder, capacity: u32) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |id| Self {
            capacity,
            slots: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            owned: AtomicU64::new(0),
            head: AtomicU32::new(0),
            tail: AtomicU32::new(0),
            receiving: AtomicBool::new(false),
            orphaned: AtomicBool::new(false),
            gate: Gate::create(arena, Holder::Object(id), GateMode::Latch, false),
            counters: Counters::default(),
        })
    }

    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Open while messages are (or are about to be) available.
    #[must_use]
    pub const fn gate(&self) -> &Ref<Gate> {
        &self.gate
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        let tail = self.tail.load(Ordering::Acquire);
        self.distance(self.head.load(Ordering::Acquire), tail)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_orphaned(&self) -> bool {
        self.orphaned.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            sends: self.counters.sends.load(Ordering::Relaxed),
            receives: self.counters.receives.load(Ordering::Relaxed),
            false_closes: self.counters.false_closes.load(Ordering::Relaxed),
        }
    }

    const fn lap(&self) -> u32 {
        2 * self.capacity
    }

    const fn next(&self, index: u32) -> u32 {
        if index + 1 == self.lap() { 0 } else { index + 1 }
    }

    const fn distance(&self, head: u32, tail: u32) -> u32 {
        (tail + self.lap() - head) % self.lap()
    }

    const fn slot(&self, index: u32) -> usize {
        (index % self.capacity) as usize
    }

    const fn slot_bit(&self, index: u32) -> u64 {
        1 << self.slot(index)
    }

    /// Enqueues `message`. Returns whether the gate has waiters that need a
    /// scheduler pass.
    ///
    /// # Errors
    /// [`SyscallError::MailboxFull`], or [`SyscallError::Orphaned`] once the
    /// receiver is gone.
    pub fn send(&self, message: u64) -> Result<bool, SyscallError> {
        if self.is_orphaned() {
            return Err(SyscallError::Orphaned);
        }
        let mut tail = self.tail.load(Ordering::Acquire);
        loop {
            let head = self.head.load(Ordering::Acquire);
            if self.distance(head, tail) >= self.capacity {
                return Err(SyscallError::MailboxFull);
            }
            match self.tail.compare_exchange_weak(
                tail,
                self.next(tail),
                Ordering::SeqCst,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => tail = actual,
            }
        }
        self.slots[self.slot(tail)].store(message, Ordering::Relaxed);
        self.owned.fetch_or(self.slot_bit(tail), Ordering::Release);
        self.counters.sends.fetch_add(1, Ordering::Relaxed);
        Ok(self.gate.open_fast())
    }

    /// Takes the message at `head` if it has been published.
    #[must_use]
    pub fn take(&self) -> Option<Taken> {
        let head = self.head.load(Ordering::Acquire);
        let bit = self.slot_bit(head);
        if self.owned.load(Ordering::Acquire) & bit == 0 {
            return None;
        }
        let message = self.slots[self.slot(head)].load(Ordering::Relaxed);
        self.owned.fetch_and(!bit, Ordering::AcqRel);
        let head = self.next(head);
        self.head.store(head, Ordering::SeqCst);
        self.counters.receives.fetch_add(1, Ordering::Relaxed);
        Some(Taken { message, head })
    }

    /// Closes the gate if `head` caught up with `tail`. Returns whether it
    /// closed.
    pub fn close_if_drained(&self, head: u32) -> bool {
        if self.tail.load(Ordering::SeqCst) != head {
            return false;
        }
        self.gate.close();
        true
    }

    /// Re-checks `tail` after a speculative close and reopens the gate if a
    /// producer got in. Returns `Some(needs_wake)` when it reopened.
    pub fn revalidate(&self, head: u32) -> Option<bool> {
        if self.tail.load(Ordering::SeqCst) == head {
            return None;
        }
        self.counters.false_closes.fetch_add(1, Ordering::Relaxed);
        log::debug!(target: "kernel::mailbox", "speculative close lost to a concurrent send");
        Some(self.gate.open_fast())
    }

    /// Receives one message. Returns the message and whether the gate has
    /// waiters that need a scheduler pass.
    ///
    /// # Errors
    /// [`SyscallError::WouldBlock`] when empty (or another receive is in
    /// progress), [`SyscallError::Orphaned`] when empty and orphaned.
    pub fn receive(&self) -> Result<(u64, bool), SyscallError> {
        if self
            .receiving
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(SyscallError::WouldBlock);
        }
        let outcome = match self.take() {
            None if self.is_orphaned() => Err(SyscallError::Orphaned),
            None => Err(SyscallError::WouldBlock),
            Some(taken) => {
                let wake = if self.close_if_drained(taken.head) {
                    self.revalidate(taken.head).unwrap_or(false)
                } else {
                    false
                };
                Ok((taken.message, wake))
            }
        };
        self.receiving.store(false, Ordering::Release);
        outcome
    }

    /// The other side is gone; opens the gate so waiters observe it.
    pub(crate) fn orphan(&self) -> bool {
        self.orphaned.store(true, Ordering::Release);
        self.gate.open_fast()
    }
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .field("orphaned", &self.is_orphaned())
            .field("gate_open", &self.gate.is_open())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::arena::tests::arena;

    fn mailbox(capacity: u32) -> Ref<Mailbox> {
        Mailbox::create(&arena(1), Holder::Kernel("test"), capacity)
    }

    #[test]
    fn indices_wrap_at_two_laps() {
        let m = mailbox(3);
        m.head.store(5, Ordering::SeqCst);
        m.tail.store(5, Ordering::SeqCst);

        assert_eq!(m.send(1), Ok(false));
        assert_eq!(m.send(2), Ok(false));
        assert_eq!(m.tail.load(Ordering::SeqCst), 1);
        assert_eq!(m.len(), 2);
        assert_eq!(m.receive(), Ok((1, false)));
        assert_eq!(m.receive(), Ok((2, false)));
        assert_eq!(m.receive(), Err(SyscallError::WouldBlock));
    }

    #[test]
    fn full_ring_is_not_empty_after_many_laps() {
        let m = mailbox(3);
        let mut next = 0;
        let mut expected = 0;
        for _ in 0..20 {
            while m.send(next).is_ok() {
                next += 1;
            }
            assert_eq!(m.len(), 3);
            for _ in 0..2 {
                assert_eq!(m.receive().map(|(v, _)| v), Ok(expected));
                expected += 1;
            }
        }
        while let Ok((v, _)) = m.receive() {
            assert_eq!(v, expected);
            expected += 1;
        }
        assert_eq!(expected, next);
        assert!(m.is_empty());
    }
}

/// Send capability for a mailbox.
#[derive(Debug)]
pub struct Mailslot {
    mailbox: Ref<Mailbox>,
}

impl Mailslot {
    pub(crate) fn create(arena: &Arc<Arena>, holder: Holder, mailbox: &Ref<Mailbox>) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |id| Self {
            mailbox: mailbox.clone_as(Holder::Object(id)),
        })
    }

    #[must_use]
    pub const fn mailbox(&self) -> &Ref<Mailbox> {
        &self.mailbox
    }
}

/// Receive capability for a mailbox. Reclaiming it orphans the mailbox.
#[derive(Debug)]
pub struct MailboxOwner {
    mailbox: Ref<Mailbox>,
}

impl MailboxOwner {
    pub(crate) fn create(arena: &Arc<Arena>, holder: Holder, mailbox: &Ref<Mailbox>) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |id| Self {
            mailbox: mailbox.clone_as(Holder::Object(id)),
        })
    }

    #[must_use]
    pub const fn mailbox(&self) -> &Ref<Mailbox> {
        &self.mailbox
    }
}
