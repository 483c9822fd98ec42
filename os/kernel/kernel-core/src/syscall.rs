//! # Syscall ABI
//!
//! A trap delivers a [`RawSyscall`]: the call number plus six argument
//! registers. [`Syscall::decode`] turns it into a typed [`Syscall`]; the
//! result register carries `Ok(v)` as `v` and errors as the negative
//! [`SyscallError::code`].
//!
//! | Id | Call | Arguments | Result |
//! |----|------|-----------|--------|
//! | 1 | `ExitThread` | code | none |
//! | 2 | `ExitProcess` | code | none |
//! | 3 | `Yield` | | 0 |
//! | 4 | `ReadTick` | | tick |
//! | 5 | `CurrentCore` | | core index |
//! | 6 | `Sleep` | ticks | 0 |
//! | 7 | `Wait` | [`WaitWord`], token × 4, timeout | index of the satisfied entry |
//! | 8 | `SetAffinity` | core mask | 0 |
//! | 9 | `CreateThread` | entry, arg | thread token |
//! | 10 | `CreateGate` | latch?, open? | token |
//! | 11 | `CreateNotify` | | token |
//! | 12 | `CreateSemaphore` | initial, max | `user << 32 \| semaphore` |
//! | 13 | `CreateMailbox` | capacity | `slot << 32 \| owner` |
//! | 14 | `CreateAlarm` | | token |
//! | 15–17 | `GateSet` / `GateReset` / `GatePulse` | token | 0 |
//! | 18 | `NotifySignal` | token | 0 |
//! | 19 | `SemaphoreRelease` | token, count | 0 |
//! | 20 | `MailboxSend` | token, message | 0 |
//! | 21 | `MailboxReceive` | token | message |
//! | 22 | `AlarmArm` | token, delay, period | 0 |
//! | 23 | `AlarmCancel` | token | 0 |
//! | 24 | `CloseToken` | token | 0 |
//! | 25 | `IoRequest` | token, request | handler result |
//! | 26 | `BindInterrupt` | line | token |

use crate::error::SyscallError;
use crate::sched::WaitMode;
use bitfield_struct::bitfield;
use kernel_hal::{CoreMask, InterruptId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallId {
    ExitThread = 1,
    ExitProcess = 2,
    Yield = 3,
    ReadTick = 4,
    CurrentCore = 5,
    Sleep = 6,
    Wait = 7,
    SetAffinity = 8,
    CreateThread = 9,
    CreateGate = 10,
    CreateNotify = 11,
    CreateSemaphore = 12,
    CreateMailbox = 13,
    CreateAlarm = 14,
    GateSet = 15,
    GateReset = 16,
    GatePulse = 17,
    NotifySignal = 18,
    SemaphoreRelease = 19,
    MailboxSend = 20,
    MailboxReceive = 21,
    AlarmArm = 22,
    AlarmCancel = 23,
    CloseToken = 24,
    IoRequest = 25,
    BindInterrupt = 26,
}

impl SyscallId {
    pub const ALL: [Self; 26] = [
        Self::ExitThread,
        Self::ExitProcess,
        Self::Yield,
        Self::ReadTick,
        Self::CurrentCore,
        Self::Sleep,
        Self::Wait,
        Self::SetAffinity,
        Self::CreateThread,
        Self::CreateGate,
        Self::CreateNotify,
        Self::CreateSemaphore,
        Self::CreateMailbox,
        Self::CreateAlarm,
        Self::GateSet,
        Self::GateReset,
        Self::GatePulse,
        Self::NotifySignal,
        Self::SemaphoreRelease,
        Self::MailboxSend,
        Self::MailboxReceive,
        Self::AlarmArm,
        Self::AlarmCancel,
        Self::CloseToken,
        Self::IoRequest,
        Self::BindInterrupt,
    ];
}

impl TryFrom<u32> for SyscallId {
    type Error = SyscallError;

    fn try_from(value: u32) -> Result<Self, SyscallError> {
        Self::ALL
            .iter()
            .copied()
            .find(|id| *id as u32 == value)
            .ok_or(SyscallError::UnknownSyscall)
    }
}

/// The six argument registers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyscallArgs(pub [u64; 6]);

/// A trapped syscall as the entry stub saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSyscall {
    pub id: u32,
    pub args: SyscallArgs,
}

impl RawSyscall {
    #[must_use]
    pub const fn new(id: SyscallId, args: [u64; 6]) -> Self {
        Self {
            id: id as u32,
            args: SyscallArgs(args),
        }
    }
}

/// First argument of `Wait`.
#[bitfield(u64)]
pub struct WaitWord {
    /// Number of tokens in `args[1..]`.
    #[bits(3)]
    pub count: u8,
    /// Wake when every entry is satisfied instead of any.
    pub all: bool,
    /// `args[5]` holds a timeout in ticks.
    pub has_timeout: bool,
    #[bits(59)]
    __: u64,
}

/// Up to four tokens of a `Wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTokens {
    tokens: [u32; 4],
    len: u8,
}

impl WaitTokens {
    /// # Errors
    /// [`SyscallError::InvalidArgument`] for an empty or oversized list.
    pub fn new(tokens: &[u32]) -> Result<Self, SyscallError> {
        if tokens.is_empty() || tokens.len() > 4 {
            return Err(SyscallError::InvalidArgument);
        }
        let mut out = [0; 4];
        out[..tokens.len()].copy_from_slice(tokens);
        Ok(Self {
            tokens: out,
            len: tokens.len() as u8,
        })
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u32] {
        &self.tokens[..usize::from(self.len)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    ExitThread { code: i64 },
    ExitProcess { code: i64 },
    Yield,
    ReadTick,
    CurrentCore,
    Sleep { ticks: u64 },
    Wait { tokens: WaitTokens, mode: WaitMode, timeout: Option<u64> },
    SetAffinity { mask: CoreMask },
    CreateThread { entry: u64, arg: u64 },
    CreateGate { latch: bool, open: bool },
    CreateNotify,
    CreateSemaphore { initial: u32, max: u32 },
    CreateMailbox { capacity: u32 },
    CreateAlarm,
    GateSet { token: u32 },
    GateReset { token: u32 },
    GatePulse { token: u32 },
    NotifySignal { token: u32 },
    SemaphoreRelease { token: u32, count: u32 },
    MailboxSend { token: u32, message: u64 },
    MailboxReceive { token: u32 },
    AlarmArm { token: u32, delay: u64, period: u64 },
    AlarmCancel { token: u32 },
    CloseToken { token: u32 },
    IoRequest { token: u32, request: u64 },
    BindInterrupt { line: InterruptId },
}

fn token(arg: u64) -> Result<u32, SyscallError> {
    u32::try_from(arg).map_err(|_| SyscallError::InvalidToken)
}

fn small(arg: u64) -> Result<u32, SyscallError> {
    u32::try_from(arg).map_err(|_| SyscallError::InvalidArgument)
}

impl Syscall {
    /// Decodes a trapped call.
    ///
    /// # Errors
    /// [`SyscallError::UnknownSyscall`] for an unassigned id,
    /// [`SyscallError::InvalidArgument`] / [`SyscallError::InvalidToken`] for
    /// arguments that do not fit their field.
    pub fn decode(raw: RawSyscall) -> Result<Self, SyscallError> {
        let [a0, a1, a2, a3, a4, a5] = raw.args.0;
        let id = SyscallId::try_from(raw.id)?;
        Ok(match id {
            SyscallId::ExitThread => Self::ExitThread { code: a0 as i64 },
            SyscallId::ExitProcess => Self::ExitProcess { code: a0 as i64 },
            SyscallId::Yield => Self::Yield,
            SyscallId::ReadTick => Self::ReadTick,
            SyscallId::CurrentCore => Self::CurrentCore,
            SyscallId::Sleep => Self::Sleep { ticks: a0 },
            SyscallId::Wait => {
                let word = WaitWord::from_bits(a0);
                let count = usize::from(word.count());
                let all = [a1, a2, a3, a4];
                if count == 0 || count > all.len() {
                    return Err(SyscallError::InvalidArgument);
                }
                let mut tokens = [0; 4];
                for (slot, arg) in tokens.iter_mut().zip(&all[..count]) {
                    *slot = token(*arg)?;
                }
                Self::Wait {
                    tokens: WaitTokens::new(&tokens[..count])?,
                    mode: if word.all() { WaitMode::All } else { WaitMode::Any },
                    timeout: word.has_timeout().then_some(a5),
                }
            }
            SyscallId::SetAffinity => Self::SetAffinity {
                mask: CoreMask::from_bits(a0),
            },
            SyscallId::CreateThread => Self::CreateThread { entry: a0, arg: a1 },
            SyscallId::CreateGate => Self::CreateGate {
                latch: a0 != 0,
                open: a1 != 0,
            },
            SyscallId::CreateNotify => Self::CreateNotify,
            SyscallId::CreateSemaphore => Self::CreateSemaphore {
                initial: small(a0)?,
                max: small(a1)?,
            },
            SyscallId::CreateMailbox => Self::CreateMailbox { capacity: small(a0)? },
            SyscallId::CreateAlarm => Self::CreateAlarm,
            SyscallId::GateSet => Self::GateSet { token: token(a0)? },
            SyscallId::GateReset => Self::GateReset { token: token(a0)? },
            SyscallId::GatePulse => Self::GatePulse { token: token(a0)? },
            SyscallId::NotifySignal => Self::NotifySignal { token: token(a0)? },
            SyscallId::SemaphoreRelease => Self::SemaphoreRelease {
                token: token(a0)?,
                count: small(a1)?,
            },
            SyscallId::MailboxSend => Self::MailboxSend {
                token: token(a0)?,
                message: a1,
            },
            SyscallId::MailboxReceive => Self::MailboxReceive { token: token(a0)? },
            SyscallId::AlarmArm => Self::AlarmArm {
                token: token(a0)?,
                delay: a1,
                period: a2,
            },
            SyscallId::AlarmCancel => Self::AlarmCancel { token: token(a0)? },
            SyscallId::CloseToken => Self::CloseToken { token: token(a0)? },
            SyscallId::IoRequest => Self::IoRequest {
                token: token(a0)?,
                request: a1,
            },
            SyscallId::BindInterrupt => Self::BindInterrupt { line: small(a0)? },
        })
    }

    /// Builds the register image a caller traps with.
    #[must_use]
    pub fn encode(&self) -> RawSyscall {
        let (id, args) = match *self {
            Self::ExitThread { code } => (SyscallId::ExitThread, [code as u64, 0, 0, 0, 0, 0]),
            Self::ExitProcess { code } => (SyscallId::ExitProcess, [code as u64, 0, 0, 0, 0, 0]),
            Self::Yield => (SyscallId::Yield, [0; 6]),
            Self::ReadTick => (SyscallId::ReadTick, [0; 6]),
            Self::CurrentCore => (SyscallId::CurrentCore, [0; 6]),
            Self::Sleep { ticks } => (SyscallId::Sleep, [ticks, 0, 0, 0, 0, 0]),
            Self::Wait {
                tokens,
                mode,
                timeout,
            } => {
                let slice = tokens.as_slice();
                let word = WaitWord::new()
                    .with_count(slice.len() as u8)
                    .with_all(mode == WaitMode::All)
                    .with_has_timeout(timeout.is_some());
                let mut args = [word.into_bits(), 0, 0, 0, 0, timeout.unwrap_or(0)];
                for (slot, t) in args[1..5].iter_mut().zip(slice) {
                    *slot = u64::from(*t);
                }
                (SyscallId::Wait, args)
            }
            Self::SetAffinity { mask } => (SyscallId::SetAffinity, [mask.bits(), 0, 0, 0, 0, 0]),
            Self::CreateThread { entry, arg } => {
                (SyscallId::CreateThread, [entry, arg, 0, 0, 0, 0])
            }
            Self::CreateGate { latch, open } => (
                SyscallId::CreateGate,
                [u64::from(latch), u64::from(open), 0, 0, 0, 0],
            ),
            Self::CreateNotify => (SyscallId::CreateNotify, [0; 6]),
            Self::CreateSemaphore { initial, max } => (
                SyscallId::CreateSemaphore,
                [u64::from(initial), u64::from(max), 0, 0, 0, 0],
            ),
            Self::CreateMailbox { capacity } => {
                (SyscallId::CreateMailbox, [u64::from(capacity), 0, 0, 0, 0, 0])
            }
            Self::CreateAlarm => (SyscallId::CreateAlarm, [0; 6]),
            Self::GateSet { token } => (SyscallId::GateSet, [u64::from(token), 0, 0, 0, 0, 0]),
            Self::GateReset { token } => (SyscallId::GateReset, [u64::from(token), 0, 0, 0, 0, 0]),
            Self::GatePulse { token } => (SyscallId::GatePulse, [u64::from(token), 0, 0, 0, 0, 0]),
            Self::NotifySignal { token } => {
                (SyscallId::NotifySignal, [u64::from(token), 0, 0, 0, 0, 0])
            }
            Self::SemaphoreRelease { token, count } => (
                SyscallId::SemaphoreRelease,
                [u64::from(token), u64::from(count), 0, 0, 0, 0],
            ),
            Self::MailboxSend { token, message } => {
                (SyscallId::MailboxSend, [u64::from(token), message, 0, 0, 0, 0])
            }
            Self::MailboxReceive { token } => {
                (SyscallId::MailboxReceive, [u64::from(token), 0, 0, 0, 0, 0])
            }
            Self::AlarmArm {
                token,
                delay,
                period,
            } => (SyscallId::AlarmArm, [u64::from(token), delay, period, 0, 0, 0]),
            Self::AlarmCancel { token } => {
                (SyscallId::AlarmCancel, [u64::from(token), 0, 0, 0, 0, 0])
            }
            Self::CloseToken { token } => {
                (SyscallId::CloseToken, [u64::from(token), 0, 0, 0, 0, 0])
            }
            Self::IoRequest { token, request } => {
                (SyscallId::IoRequest, [u64::from(token), request, 0, 0, 0, 0])
            }
            Self::BindInterrupt { line } => {
                (SyscallId::BindInterrupt, [u64::from(line), 0, 0, 0, 0, 0])
            }
        };
        RawSyscall::new(id, args)
    }

    /// Handled on the trapping core without a scheduler round trip.
    #[must_use]
    pub const fn is_fast_path(&self) -> bool {
        matches!(
            self,
            Self::Yield
                | Self::ReadTick
                | Self::CurrentCore
                | Self::MailboxSend { .. }
                | Self::MailboxReceive { .. }
        )
    }
}

/// Encodes a result for the result register.
#[must_use]
pub const fn encode_result(result: Result<u64, SyscallError>) -> u64 {
    match result {
        Ok(v) => v,
        Err(e) => e.code() as u64,
    }
}

/// Inverse of [`encode_result`]; what a user-mode stub does after the trap.
#[must_use]
pub const fn decode_result(register: u64) -> Result<u64, SyscallError> {
    match SyscallError::from_code(register as i64) {
        Some(e) => Err(e),
        None => Ok(register),
    }
}
