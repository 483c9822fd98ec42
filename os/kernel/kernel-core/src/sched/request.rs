use crate::error::SyscallError;
use crate::ipc::{InterfaceInstance, IpcEndpoint};
use crate::object::{ObjectRef, Ref};
use crate::process::Process;
use crate::sched::TimerKey;
use crate::sync::{Gate, MailboxOwner, Mailslot, Semaphore};
use crate::syscall::Syscall;
use crate::thread::{Fault, Thread, ThreadId};
use alloc::string::String;
use alloc::vec::Vec;
use kernel_hal::CoreMask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Wake on the first satisfied entry; the result is its index.
    Any,
    /// Wake once every entry is satisfied.
    All,
}

/// Operations a kernel thread asks the scheduler for.
///
/// Unlike syscalls they name objects directly instead of through tokens.
#[derive(Debug)]
pub enum KernelOp {
    Wait {
        targets: Vec<ObjectRef>,
        mode: WaitMode,
        timeout: Option<u64>,
    },
    Signal(ObjectRef),
    SetAffinity(CoreMask),
    MailboxSend {
        slot: Ref<Mailslot>,
        message: u64,
    },
    MailboxReceive(Ref<MailboxOwner>),
    InterfacePublish {
        name: String,
    },
    InterfaceSubscribe {
        name: String,
    },
    InterfaceEnumerate,
    IpcConnect {
        name: String,
    },
    IpcAccept(Ref<InterfaceInstance>),
    IpcReject(Ref<InterfaceInstance>),
    IpcDisconnect(Ref<IpcEndpoint>),
    Exit {
        code: i64,
    },
}

/// Outcome of a [`KernelOp`], read back with
/// [`Thread::take_kernel_result`](crate::Thread::take_kernel_result).
#[derive(Debug)]
pub enum KernelOpResult {
    Value(u64),
    Object(ObjectRef),
    Error(SyscallError),
}

impl KernelOpResult {
    #[must_use]
    pub const fn value(&self) -> Option<u64> {
        match self {
            Self::Value(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_object(self) -> Option<ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    #[must_use]
    pub const fn error(&self) -> Option<SyscallError> {
        match self {
            Self::Error(e) => Some(*e),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub(crate) enum Call {
    User(Syscall),
    Kernel(KernelOp),
}

/// One queued scheduler item with the tick it was enqueued at.
#[derive(Debug)]
pub(crate) struct SchedRequest {
    pub stamp: u64,
    pub kind: RequestKind,
}

#[derive(Debug)]
pub(crate) enum RequestKind {
    StartThread(Ref<Thread>),
    Syscall {
        thread: Ref<Thread>,
        call: Call,
    },
    /// The thread left its core because of an abort or a crash.
    Aborted {
        thread: Ref<Thread>,
        crash: Option<Fault>,
    },
    /// The thread's core can no longer run it.
    Requeue(Ref<Thread>),
    StopProcess {
        process: Ref<Process>,
        code: i64,
    },
    /// The stop DPC released the token table.
    ProcessStopped(Ref<Process>),
    /// Only advances time.
    TimerTick,
    AlarmCancel(TimerKey),
    SemaphoreReturn {
        semaphore: Ref<Semaphore>,
        count: u32,
    },
    InterruptPulse(Ref<Gate>),
    /// The gate was opened outside the scheduler; walk its waiters.
    GateWake(Ref<Gate>),
    Signal(ObjectRef),
    IoComplete {
        thread: ThreadId,
        result: Result<u64, SyscallError>,
    },
    DebugRelease(Ref<Process>),
}

impl RequestKind {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::StartThread(_) => "start-thread",
            Self::Syscall { .. } => "syscall",
            Self::Aborted { .. } => "aborted",
            Self::Requeue(_) => "requeue",
            Self::StopProcess { .. } => "stop-process",
            Self::ProcessStopped(_) => "process-stopped",
            Self::TimerTick => "timer-tick",
            Self::AlarmCancel(_) => "alarm-cancel",
            Self::SemaphoreReturn { .. } => "semaphore-return",
            Self::InterruptPulse(_) => "interrupt-pulse",
            Self::GateWake(_) => "gate-wake",
            Self::Signal(_) => "signal",
            Self::IoComplete { .. } => "io-complete",
            Self::DebugRelease(_) => "debug-release",
        }
    }
}
