//! # Platform contracts consumed by the kernel core
//!
//! The scheduler, object model and cross-core fabric never touch page tables,
//! the interrupt controller or the timer directly. They go through the narrow
//! traits in this crate:
//!
//! | Trait | Contract |
//! |-------|----------|
//! | [`PageAllocator`] | Allocate/free physical page runs; reserve against the global page budget. |
//! | [`PageTables`] | Install/remove one translation; invalidate one TLB entry on one core. |
//! | [`InterruptController`] | Acknowledge, end, mask interrupts; send directed inter-processor interrupts. |
//! | [`HighFrequencyTimer`] | Read the global tick; arm/disarm a core's one-shot deadline. |
//! | [`CoreLocator`] | Which core is executing the caller. |
//!
//! [`Platform`] bundles all of them together with
//! [`InterruptControl`](kernel_sync::InterruptControl).

#![cfg_attr(not(any(test, doctest)), no_std)]

mod addresses;
mod attributes;
mod cores;
mod error;
mod interrupts;
mod memory;
mod timer;

pub use addresses::{AddressSpaceId, PAGE_SIZE, PhysicalAddress, PhysicalRange, VirtualAddress};
pub use attributes::PageAttributes;
pub use cores::{CoreId, CoreMask, CoreMaskIter, MAX_CORES};
pub use error::HalError;
pub use interrupts::{InterruptController, InterruptId, TIMER_VECTOR, XCI_VECTOR};
pub use memory::{PageAllocator, PageTables, Reservation};
pub use timer::HighFrequencyTimer;

use kernel_sync::InterruptControl;

/// Reports the core executing the caller.
pub trait CoreLocator: Send + Sync {
    /// `None` when called outside of any core context (e.g. early boot).
    fn current_core(&self) -> Option<CoreId>;
}

/// Everything the kernel core needs from the machine.
pub trait Platform:
    PageAllocator
    + PageTables
    + InterruptController
    + HighFrequencyTimer
    + CoreLocator
    + InterruptControl
    + Send
    + Sync
    + 'static
{
}

impl<T> Platform for T where
    T: PageAllocator
        + PageTables
        + InterruptController
        + HighFrequencyTimer
        + CoreLocator
        + InterruptControl
        + Send
        + Sync
        + 'static
{
}
