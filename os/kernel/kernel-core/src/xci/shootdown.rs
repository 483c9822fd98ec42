use crate::kernel::Kernel;
use crate::memory::{PageArray, VirtualMap};
use crate::object::Ref;
use crate::xci::Xci;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_hal::{AddressSpaceId, CoreId, CoreMask, Platform, VirtualAddress};

/// A range every other core must drop from its TLB before the backing pages
/// may be reused.
pub struct ShootdownRequest {
    space: AddressSpaceId,
    base: VirtualAddress,
    pages: usize,
    initiator: CoreId,
    /// Cores that have not acknowledged yet.
    pending: AtomicU64,
}

impl ShootdownRequest {
    pub(crate) fn new(
        space: AddressSpaceId,
        base: VirtualAddress,
        pages: usize,
        initiator: CoreId,
        targets: CoreMask,
    ) -> Arc<Self> {
        Arc::new(Self {
            space,
            base,
            pages,
            initiator,
            pending: AtomicU64::new(targets.bits()),
        })
    }

    #[must_use]
    pub const fn space(&self) -> AddressSpaceId {
        self.space
    }

    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[must_use]
    pub const fn pages(&self) -> usize {
        self.pages
    }

    #[must_use]
    pub const fn initiator(&self) -> CoreId {
        self.initiator
    }

    #[must_use]
    pub fn pending(&self) -> CoreMask {
        CoreMask::from_bits(self.pending.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    /// Records `core`'s acknowledgement. Returns whether it was the last.
    pub(crate) fn ack(&self, core: CoreId) -> bool {
        let bit = CoreMask::single(core).bits();
        let before = self.pending.fetch_and(!bit, Ordering::AcqRel);
        if before & bit == 0 {
            fatal!("{core:?} acknowledged a shootdown it was not asked for");
        }
        before == bit
    }
}

impl fmt::Debug for ShootdownRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShootdownRequest")
            .field("space", &self.space)
            .field("base", &self.base)
            .field("pages", &self.pages)
            .field("initiator", &self.initiator)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Initiator-side state of one shootdown.
#[derive(Debug)]
pub(crate) struct ShootdownJob {
    request: Arc<ShootdownRequest>,
    unsent: CoreMask,
    /// Freed once every core acknowledged.
    backing: Option<Ref<PageArray>>,
}

impl ShootdownJob {
    pub(crate) fn has_unsent(&self) -> bool {
        !self.unsent.is_empty()
    }

    fn is_done(&self) -> bool {
        self.unsent.is_empty() && self.request.is_complete()
    }
}

impl<P: Platform> Kernel<P> {
    /// Unmaps a reclaimed mapping and starts the shootdown of its range.
    ///
    /// The local TLB is invalidated right away; the backing pages stay
    /// allocated until every other core has acknowledged.
    pub(crate) fn tear_down_mapping(&self, core: CoreId, map: &VirtualMap) {
        for page in 0..map.pages() as u64 {
            let va = map.base().page_offset(page);
            if let Err(e) = self.platform.unmap(map.space(), va) {
                log::warn!(target: "kernel::memory", "unmapping {va:?}: {e}");
            }
            self.platform.invalidate_tlb_entry(core, map.space(), va);
        }
        let backing = map.take_backing();
        let targets = self.online_cores().without(core);
        if targets.is_empty() {
            drop(backing);
            return;
        }
        let request = ShootdownRequest::new(map.space(), map.base(), map.pages(), core, targets);
        log::debug!(target: "kernel::xci", "{core:?}: shootdown {request:?}");
        self.cpu(core).local.lock().shootdowns.push(ShootdownJob {
            request,
            unsent: targets,
            backing,
        });
    }

    /// Sends outstanding invalidations and retires completed shootdowns.
    /// Returns whether anything moved.
    pub(crate) fn advance_shootdowns(&self, core: CoreId) -> bool {
        let jobs = core::mem::take(&mut self.cpu(core).local.lock().shootdowns);
        if jobs.is_empty() {
            return false;
        }
        let mut progressed = false;
        let mut waiting = alloc::vec::Vec::new();
        for mut job in jobs {
            for target in job.unsent.iter() {
                if self.cpu(target).is_halted() {
                    job.unsent.remove(target);
                    job.request.ack(target);
                    progressed = true;
                    continue;
                }
                if self
                    .try_send_xci(core, target, Xci::TlbInvalidate(Arc::clone(&job.request)))
                    .is_ok()
                {
                    job.unsent.remove(target);
                    progressed = true;
                }
            }
            if job.is_done() {
                log::debug!(
                    target: "kernel::xci",
                    "{core:?}: shootdown of {:?} complete",
                    job.request.base(),
                );
                progressed = true;
                drop(job);
            } else {
                waiting.push(job);
            }
        }
        self.cpu(core).local.lock().shootdowns.extend(waiting);
        progressed
    }

    /// Receiver side: invalidates the range locally and acknowledges.
    pub(crate) fn service_shootdown(&self, core: CoreId, request: &ShootdownRequest) {
        for page in 0..request.pages() as u64 {
            self.platform
                .invalidate_tlb_entry(core, request.space(), request.base().page_offset(page));
        }
        if request.ack(core) {
            self.post_xci(core, request.initiator(), Xci::Wake);
        }
    }
}
