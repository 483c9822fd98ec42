//! # Synchronization primitives
//!
//! | Object | Waiting succeeds when | Consumes |
//! |--------|-----------------------|----------|
//! | [`Gate`] (latch) | gate is open | nothing |
//! | [`Gate`] (auto-reset) | gate is open | closes the gate |
//! | [`Notify`] | signalled | the signal |
//! | [`Semaphore`] | count > 0 | one count |
//!
//! Alarms, interrupts, mailboxes, endpoints, processes and threads are
//! waited on through their gate; subscriptions and interface instances
//! through their notify.
//!
//! Wait lists are only walked by the Locked Scheduler. Mounting happens under
//! the same per-object lock that state changes use, so a signal either sees
//! the waiter or the waiter sees the signal.

mod alarm;
mod gate;
mod interrupt;
mod mailbox;
mod notify;
mod semaphore;

pub use alarm::Alarm;
pub use gate::{Gate, GateMode};
pub use interrupt::Interrupt;
pub use mailbox::{Mailbox, MailboxOwner, MailboxStats, Mailslot, Taken};
pub use notify::{Notify, NotifyProxy};
pub use semaphore::{Semaphore, SemaphoreUser};

use crate::error::SyscallError;
use crate::ipc::{InterfaceInstance, InterfaceSubscription, IpcEndpoint};
use crate::object::{Holder, ObjectRef, Ref};
use crate::process::Process;
use crate::thread::{Thread, ThreadId};
use alloc::vec::Vec;

/// One mounted macro-wait entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Waiter {
    pub thread: ThreadId,
    pub entry: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mount {
    /// Available right away; consumed, not mounted.
    Acquired,
    Mounted,
}

/// Wait-list operations shared by the primitives.
pub(crate) trait Waitable {
    /// Consumes the object if available, otherwise mounts `waiter`.
    fn acquire_or_mount(&self, waiter: Waiter) -> Mount;

    /// Consumes on behalf of a mounted waiter and dismounts that entry.
    /// `false` when nothing is available.
    fn claim(&self, waiter: Waiter) -> bool;

    fn dismount(&self, thread: ThreadId);

    /// Mounted waiters in FIFO order.
    fn waiters(&self) -> Vec<Waiter>;

    /// Returns what an earlier acquire or claim consumed.
    fn unconsume(&self);
}

/// What one macro-wait entry waits on, resolved from an object.
#[derive(Debug)]
pub(crate) enum WaitTarget {
    Gate(Ref<Gate>),
    Notify(Ref<Notify>),
    Semaphore {
        semaphore: Ref<Semaphore>,
        user: Option<Ref<SemaphoreUser>>,
    },
}

impl WaitTarget {
    /// Resolves an object to the primitive a wait on it blocks on.
    pub(crate) fn resolve(object: &ObjectRef, holder: Holder) -> Result<Self, SyscallError> {
        if let Some(g) = object.as_ref::<Gate>() {
            return Ok(Self::Gate(g.clone_as(holder)));
        }
        if let Some(n) = object.as_ref::<Notify>() {
            return Ok(Self::Notify(n.clone_as(holder)));
        }
        if let Some(s) = object.as_ref::<Semaphore>() {
            return Ok(Self::Semaphore {
                semaphore: s.clone_as(holder),
                user: None,
            });
        }
        if let Some(u) = object.as_ref::<SemaphoreUser>() {
            return Ok(Self::Semaphore {
                semaphore: u.semaphore().clone_as(holder),
                user: Some(u.clone_as(holder)),
            });
        }
        let gate = if let Some(a) = object.as_ref::<Alarm>() {
            a.gate()
        } else if let Some(i) = object.as_ref::<Interrupt>() {
            i.gate()
        } else if let Some(o) = object.as_ref::<MailboxOwner>() {
            o.mailbox().gate()
        } else if let Some(m) = object.as_ref::<Mailbox>() {
            m.gate()
        } else if let Some(p) = object.as_ref::<Process>() {
            p.exit_gate()
        } else if let Some(t) = object.as_ref::<Thread>() {
            t.exit_gate()
        } else if let Some(e) = object.as_ref::<IpcEndpoint>() {
            e.gate()
        } else if let Some(s) = object.as_ref::<InterfaceSubscription>() {
            return Ok(Self::Notify(s.notify().clone_as(holder)));
        } else if let Some(i) = object.as_ref::<InterfaceInstance>() {
            return Ok(Self::Notify(i.notify().clone_as(holder)));
        } else {
            return Err(SyscallError::WrongObjectType);
        };
        Ok(Self::Gate(gate.clone_as(holder)))
    }

    pub(crate) fn waitable(&self) -> &dyn Waitable {
        match self {
            Self::Gate(g) => &**g,
            Self::Notify(n) => &**n,
            Self::Semaphore { semaphore, .. } => &**semaphore,
        }
    }

    pub(crate) fn acquire_or_mount(&self, waiter: Waiter) -> Mount {
        let mount = self.waitable().acquire_or_mount(waiter);
        if mount == Mount::Acquired {
            self.note_consumed();
        }
        mount
    }

    pub(crate) fn claim(&self, waiter: Waiter) -> bool {
        let claimed = self.waitable().claim(waiter);
        if claimed {
            self.note_consumed();
        }
        claimed
    }

    pub(crate) fn dismount(&self, thread: ThreadId) {
        self.waitable().dismount(thread);
    }

    pub(crate) fn unconsume(&self) {
        if let Self::Semaphore {
            user: Some(user), ..
        } = self
        {
            if user.note_returned(1).is_err() {
                fatal!("semaphore user returned a count it never acquired");
            }
        }
        self.waitable().unconsume();
    }

    fn note_consumed(&self) {
        if let Self::Semaphore {
            user: Some(user), ..
        } = self
        {
            user.note_acquired();
        }
    }
}
