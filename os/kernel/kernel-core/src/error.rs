use crate::thread::{ThreadEvent, ThreadState};
use kernel_hal::HalError;

/// Resource exhaustion. Reported to the caller, never retried internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    #[error("out of physical pages")]
    OutOfPages,
    #[error("out of virtual address space")]
    OutOfAddressSpace,
    #[error("out of thread slots")]
    OutOfThreadSlots,
    #[error("too many wait entries")]
    TooManyWaitEntries,
    #[error("process is stopping")]
    ProcessStopping,
}

impl KernelError {
    /// Maps an allocation failure of the platform.
    ///
    /// Mapping conflicts mean the kernel handed out overlapping ranges, which
    /// is an invariant violation rather than exhaustion.
    pub(crate) fn from_hal(err: HalError) -> Self {
        match err {
            HalError::OutOfPages | HalError::ReservationExhausted { .. } => {
                log::warn!(target: "kernel::memory", "{err}");
                Self::OutOfPages
            }
            other => fatal!("page-table layer rejected a kernel-chosen range: {other}"),
        }
    }
}

/// What user mode sees in the result register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyscallError {
    #[error("unknown syscall")]
    UnknownSyscall,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("invalid token")]
    InvalidToken,
    #[error("wrong object type")]
    WrongObjectType,
    #[error("operation would block")]
    WouldBlock,
    #[error("timed out")]
    TimedOut,
    #[error("aborted")]
    Aborted,
    #[error("mailbox full")]
    MailboxFull,
    #[error("peer is gone")]
    Orphaned,
    #[error(transparent)]
    Exhausted(#[from] KernelError),
}

impl SyscallError {
    /// Stable negative code placed in the result register.
    #[must_use]
    pub const fn code(self) -> i64 {
        match self {
            Self::UnknownSyscall => -1,
            Self::InvalidArgument => -2,
            Self::InvalidToken => -3,
            Self::WrongObjectType => -4,
            Self::WouldBlock => -5,
            Self::TimedOut => -6,
            Self::Aborted => -7,
            Self::MailboxFull => -8,
            Self::Orphaned => -9,
            Self::Exhausted(KernelError::OutOfPages) => -10,
            Self::Exhausted(KernelError::OutOfAddressSpace) => -11,
            Self::Exhausted(KernelError::OutOfThreadSlots) => -12,
            Self::Exhausted(KernelError::TooManyWaitEntries) => -13,
            Self::Exhausted(KernelError::ProcessStopping) => -14,
        }
    }

    #[must_use]
    pub const fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            -1 => Self::UnknownSyscall,
            -2 => Self::InvalidArgument,
            -3 => Self::InvalidToken,
            -4 => Self::WrongObjectType,
            -5 => Self::WouldBlock,
            -6 => Self::TimedOut,
            -7 => Self::Aborted,
            -8 => Self::MailboxFull,
            -9 => Self::Orphaned,
            -10 => Self::Exhausted(KernelError::OutOfPages),
            -11 => Self::Exhausted(KernelError::OutOfAddressSpace),
            -12 => Self::Exhausted(KernelError::OutOfThreadSlots),
            -13 => Self::Exhausted(KernelError::TooManyWaitEntries),
            -14 => Self::Exhausted(KernelError::ProcessStopping),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("thread in state {state:?} cannot handle {event:?}")]
pub struct TransitionError {
    pub state: ThreadState,
    pub event: ThreadEvent,
}

/// Transient cross-core delivery failure; the sender owns the retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum XciError {
    #[error("receiver still holds an unconsumed message from this sender")]
    SlotBusy,
}
