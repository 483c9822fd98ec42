//! # Cross-core interrupts
//!
//! Every ordered pair of cores shares one [`HandoffSlot`]: the receiver owns
//! a slot per sender. A send posts into the slot and raises the XCI vector on
//! the receiver; the receiver's interrupt entry empties every slot. A sender
//! never has more than one message in flight to the same receiver, so a full
//! slot is reported as [`XciError::SlotBusy`] and the sender retries from a
//! medium-priority DPC. A refused sender is remembered; the receiver rings
//! it with a bare XCI vector once it empties the slot, so the sender never
//! idles on a message it could not deliver.
//!
//! [`HandoffSlot`]: kernel_sync::HandoffSlot

mod shootdown;

pub use shootdown::ShootdownRequest;

pub(crate) use shootdown::ShootdownJob;

use crate::cpu::{Dpc, bump};
use crate::error::XciError;
use crate::kernel::Kernel;
use crate::process::ProcessId;
use alloc::sync::Arc;
use core::sync::atomic::{Ordering, fence};
use kernel_hal::{CoreId, CoreMask, Platform, XCI_VECTOR};

/// Message carried by one cross-core interrupt.
#[derive(Debug, Clone)]
pub enum Xci {
    /// Enter the monitor; new work was queued.
    Wake,
    /// Invalidate a range and acknowledge.
    TlbInvalidate(Arc<ShootdownRequest>),
    /// Threads of the process are aborting; reap the local ones.
    StopProcess(ProcessId),
    /// Stop scheduling; the kernel is going down.
    Panic,
}

impl<P: Platform> Kernel<P> {
    /// Sends `message` from core `from` to core `to`.
    ///
    /// # Errors
    /// [`XciError::SlotBusy`] while `to` still holds an earlier message from
    /// `from`.
    pub fn send_xci(&self, from: CoreId, to: CoreId, message: Xci) -> Result<(), XciError> {
        self.try_send_xci(from, to, message)
            .map_err(|_| XciError::SlotBusy)
    }

    /// Like [`send_xci`](Self::send_xci), handing a refused message back.
    pub(crate) fn try_send_xci(&self, from: CoreId, to: CoreId, message: Xci) -> Result<(), Xci> {
        if from == to {
            fatal!("{from:?} sent an XCI to itself");
        }
        let sender = self.cpu(from);
        let slot = &self.cpu(to).inbox[from.index()];
        if let Err(e) = slot.try_post(message) {
            // Ask for a doorbell, then look again: the receiver may have
            // emptied the slot before it could see the request.
            sender.await_slot(to, true);
            fence(Ordering::SeqCst);
            if let Err(e) = slot.try_post(e.into_inner()) {
                bump(&sender.stats.xci_busy);
                return Err(e.into_inner());
            }
            sender.await_slot(to, false);
        }
        // Slot contents must be visible before the interrupt is.
        fence(Ordering::SeqCst);
        self.platform.send_directed_interrupt(CoreMask::single(to), XCI_VECTOR);
        bump(&sender.stats.xci_sent);
        Ok(())
    }

    /// Sends and, on a busy slot, parks a resend until the receiver rings
    /// back; it then runs as a medium DPC.
    ///
    /// A refused `Wake` is dropped: the pending message already brings the
    /// receiver through its monitor.
    pub(crate) fn post_xci(&self, from: CoreId, to: CoreId, message: Xci) {
        match self.try_send_xci(from, to, message) {
            Ok(()) | Err(Xci::Wake) => {}
            Err(message) => self.cpu(from).local.lock().stalled.push(Dpc::XciRetry {
                target: to,
                message,
                attempts: 1,
            }),
        }
    }

    /// Halts every core. Cores that cannot take the message right away are
    /// flagged directly.
    pub fn halt_all(&self, from: CoreId) {
        log::error!(target: "kernel::xci", "{from:?} halting all cores");
        for cpu in self.cores.iter().filter(|c| c.id() != from) {
            if self.try_send_xci(from, cpu.id(), Xci::Panic).is_err() {
                cpu.halt();
            }
        }
        self.cpu(from).halt();
    }
}
