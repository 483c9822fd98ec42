//! # Kernel synchronization primitives
//!
//! Everything in the kernel core that spins, swaps or compare-exchanges lives
//! in this crate, so the lock-free protocols can be audited (and model
//! checked with `loom`) in one place.
//!
//! | Primitive | Used for |
//! |-----------|----------|
//! | [`SpinLock`] | Short critical sections: per-object wait lists, token tables, the timer queue. |
//! | [`IrqGuard`] / [`SpinLock::lock_irq`] | Sections that must not be re-entered by an interrupt on the same core. |
//! | [`HandoffSlot`] | One outstanding message per (sender, receiver) core pair. |
//! | [`PushList`] | Multi-producer append with a single draining owner (migrating threads, pending events, scheduler requests). |
//!
//! Interrupt masking is expressed through the [`InterruptControl`] trait so the
//! same code runs on bare metal (`irq::x86`) and in host tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod handoff;
pub mod irq;
mod push_list;
mod spin_lock;

pub use handoff::{HandoffError, HandoffSlot};
pub use irq::{InterruptControl, IrqGuard, IrqSpinLockGuard};
pub use push_list::{PushList, PushListDrain};
pub use spin_lock::{SpinLock, SpinLockGuard};
