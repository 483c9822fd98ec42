//! # Kernel objects and references
//!
//! Every kernel entity lives in an [`ObjectCell`]: an [`ObjectHeader`]
//! followed by the typed body. Code reaches objects only through
//!
//! * [`Ref<T>`]: a strong, move-only handle. Each `Ref` is one entry in the
//!   header's reference list, tagged with the [`Holder`] that owns it.
//!   Dropping the last non-permanent `Ref` flags the header as zeroed and
//!   queues the object on the current core's reclaim queue.
//! * [`WeakRef<T>`]: never keeps an object alive; [`WeakRef::upgrade`] fails
//!   once the zero flag is set.
//! * [`ObjectRef`]: a strong handle over any kind, used by token tables and
//!   wait descriptors.
//!
//! Cleanup never runs inside `Drop`. The monitor drains the reclaim queue into
//! high-priority DPCs and dispatches on [`Reclaim`], a closed enum, so adding
//! an object kind without a cleanup arm does not compile.

#[macro_use]
mod table;

pub(crate) mod arena;
pub(crate) mod cleanup;
mod external;
mod handle;
mod header;

pub use arena::Arena;
pub use external::{External, ExternalDestructor, IoHandler, IoSubmit};
pub use handle::{ObjectCell, Ref, WeakRef};
pub use header::{Holder, ObjectHeader, ObjectId};

use crate::ipc::{InterfaceEnum, InterfaceInstance, InterfaceSubscription, IpcEndpoint};
use crate::memory::{PageArray, VirtualMap};
use crate::process::Process;
use crate::sync::{
    Alarm, Gate, Interrupt, Mailbox, MailboxOwner, Mailslot, Notify, NotifyProxy, Semaphore,
    SemaphoreUser,
};
use crate::thread::Thread;

object_table! {
    Process => Process,
    Thread => Thread,
    PageArray => PageArray,
    VirtualMap => VirtualMap,
    Notify => Notify,
    Gate => Gate,
    Alarm => Alarm,
    Semaphore => Semaphore,
    SemaphoreUser => SemaphoreUser,
    Interrupt => Interrupt,
    Mailbox => Mailbox,
    MailboxOwner => MailboxOwner,
    Mailslot => Mailslot,
    InterfaceInstance => InterfaceInstance,
    InterfaceEnum => InterfaceEnum,
    InterfaceSubscription => InterfaceSubscription,
    IpcEndpoint => IpcEndpoint,
    NotifyProxy => NotifyProxy,
    External => External,
}

mod sealed {
    pub trait Sealed {}
}
