use crate::cpu::bump;
use crate::kernel::Kernel;
use crate::object::Reclaim;
use crate::process::Process;
use crate::object::Ref;
use crate::xci::Xci;
use core::fmt;
use kernel_hal::{CoreId, Platform};

/// Queue a deferred procedure call runs from.
///
/// The monitor runs at most one `High` and one `Medium` DPC per pass, and
/// `Low` DPCs only when no thread is runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DpcPriority {
    High,
    Medium,
    Low,
}

impl DpcPriority {
    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// Work deferred to the monitor of one core.
pub(crate) enum Dpc {
    /// Cleanup of an object whose last reference dropped on this core.
    Reclaim(Reclaim),
    /// Release the token table of a process with no live threads.
    ProcessStop(Ref<Process>),
    /// Resend a message whose slot was busy.
    XciRetry {
        target: CoreId,
        message: Xci,
        attempts: u32,
    },
}

impl fmt::Debug for Dpc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reclaim(r) => write!(f, "Dpc::Reclaim({r:?})"),
            Self::ProcessStop(p) => write!(f, "Dpc::ProcessStop({})", p.id()),
            Self::XciRetry {
                target, attempts, ..
            } => write!(f, "Dpc::XciRetry({target:?}, attempt {attempts})"),
        }
    }
}

impl<P: Platform> Kernel<P> {
    pub(crate) fn push_dpc(&self, core: CoreId, priority: DpcPriority, dpc: Dpc) {
        log::trace!(target: "kernel::dpc", "{core:?}: queue {dpc:?} at {priority:?}");
        self.cpu(core).push_dpc(priority, dpc);
    }

    pub(crate) fn run_dpc(&self, core: CoreId, dpc: Dpc) {
        bump(&self.cpu(core).stats.dpcs);
        match dpc {
            Dpc::Reclaim(object) => self.run_cleanup(core, object),
            Dpc::ProcessStop(process) => self.finish_process_stop(core, process),
            Dpc::XciRetry {
                target,
                message,
                attempts,
            } => {
                if self.cpu(target).is_halted() {
                    log::debug!(
                        target: "kernel::xci",
                        "{core:?}: dropping retry to halted {target:?}"
                    );
                    return;
                }
                match self.try_send_xci(core, target, message) {
                    Ok(()) => bump(&self.cpu(core).stats.xci_retries),
                    Err(message) => {
                        if attempts % 64 == 0 {
                            log::warn!(
                                target: "kernel::xci",
                                "{core:?}: {target:?} busy after {attempts} attempts"
                            );
                        }
                        self.cpu(core).local.lock().stalled.push(Dpc::XciRetry {
                            target,
                            message,
                            attempts: attempts + 1,
                        });
                    }
                }
            }
        }
    }
}
