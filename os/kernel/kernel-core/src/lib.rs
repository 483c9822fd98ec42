//! # Kernel core
//!
//! The multi-core heart of the kernel: reference-counted kernel objects, the
//! per-core monitor loop, the cross-core interrupt (XCI) fabric with its TLB
//! shootdown chain, and the Locked Scheduler that serializes every decision
//! about waits, timers and thread placement on one *scheduling core*.
//!
//! ## Data flow
//!
//! ```text
//! trap / interrupt on core N ──► Cpu::events ──► monitor(N) ──┬─► fast path result
//!                                                             └─► SchedRequest
//!                                                                     │
//!                       scheduling core: monitor ──► run_scheduler ◄──┘
//!                                                        │
//!                          migrating list of target ◄────┤ make_thread_run
//!                          XCI Wake to target     ◄──────┘
//! ```
//!
//! Every piece of boot-time state lives in an explicit [`Kernel`] value;
//! there are no process-wide statics. The machine is reached only through
//! the [`kernel_hal::Platform`] traits, so the whole core runs unmodified on
//! a host against `kernel-hal-mock`.
//!
//! ## Failure classes
//!
//! * Invariant violations (double release, impossible state transition,
//!   recursive interrupt entry) go through [`fatal!`] and never return.
//! * Resource exhaustion surfaces as [`KernelError`] / [`SyscallError`].
//! * Lost races on lock-free paths (busy XCI slot, mailbox close race) are
//!   retried by the initiator and only show up in statistics.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

/// Logs an invariant violation and halts.
///
/// The kernel's panic handler stops the machine; host tests observe the
/// panic with `#[should_panic]`.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        ::log::error!(target: "kernel::fatal", $($arg)*);
        panic!($($arg)*)
    }};
}

pub mod config;
pub mod cpu;
mod error;
mod invariants;
pub mod ipc;
mod kernel;
pub mod memory;
pub mod object;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod thread;
pub mod xci;

pub use config::{ConfigError, KernelConfig};
pub use cpu::{CoreAction, CpuStats, DpcPriority};
pub use error::{KernelError, SyscallError, TransitionError, XciError};
pub use invariants::InvariantViolation;
pub use kernel::Kernel;
pub use object::{Holder, KernelObject, ObjectId, ObjectKind, ObjectRef, Ref, WeakRef};
pub use process::{Process, ProcessId, ProcessLifecycle};
pub use sched::{KernelOp, KernelOpResult, WaitMode};
pub use syscall::{RawSyscall, Syscall, SyscallArgs, SyscallId, WaitWord};
pub use thread::{Fault, Thread, ThreadEvent, ThreadId, ThreadState};
