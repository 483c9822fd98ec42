use crate::object::{ObjectId, Reclaim};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use kernel_hal::{CoreId, CoreLocator};
use kernel_sync::{PushList, PushListDrain};

/// Allocation bookkeeping shared by every object header.
///
/// Owns the per-core reclaim queues: dropping the last reference pushes the
/// object onto the queue of the core the drop happened on, and that core's
/// monitor turns it into a high-priority cleanup DPC. Outside any core
/// context (early boot, host tests that do not impersonate a core) the
/// fallback core gets the work.
pub struct Arena {
    next_id: AtomicU64,
    live: AtomicUsize,
    reclaimed: AtomicU64,
    queues: Box<[PushList<Reclaim>]>,
    fallback: CoreId,
    locator: Arc<dyn CoreLocator>,
}

impl Arena {
    pub(crate) fn new(cores: usize, fallback: CoreId, locator: Arc<dyn CoreLocator>) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            live: AtomicUsize::new(0),
            reclaimed: AtomicU64::new(0),
            queues: (0..cores).map(|_| PushList::new()).collect(),
            fallback,
            locator,
        })
    }

    pub(crate) fn allocate_id(&self) -> ObjectId {
        self.live.fetch_add(1, Ordering::Relaxed);
        ObjectId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn note_freed(&self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn note_reclaimed(&self) {
        self.reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    fn local_core(&self) -> CoreId {
        self.locator
            .current_core()
            .filter(|c| c.index() < self.queues.len())
            .unwrap_or(self.fallback)
    }

    pub(crate) fn enqueue(&self, object: Reclaim) {
        let core = self.local_core();
        log::trace!(target: "kernel::object", "{object:?} queued on {core:?}");
        self.queues[core.index()].push(object);
    }

    pub(crate) fn take(&self, core: CoreId) -> PushListDrain<Reclaim> {
        self.queues[core.index()].take_all()
    }

    #[must_use]
    pub fn has_pending(&self, core: CoreId) -> bool {
        !self.queues[core.index()].is_empty()
    }

    /// Headers allocated and not yet freed.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }

    /// Cleanups dispatched since boot.
    #[must_use]
    pub fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Arena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("live", &self.live_objects())
            .field("reclaimed", &self.reclaimed())
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct NoCore;

    impl CoreLocator for NoCore {
        fn current_core(&self) -> Option<CoreId> {
            None
        }
    }

    pub(crate) fn arena(cores: usize) -> Arc<Arena> {
        Arena::new(cores, CoreId(0), Arc::new(NoCore))
    }

    #[test]
    fn ids_are_unique() {
        let a = arena(1);
        let x = a.allocate_id();
        let y = a.allocate_id();
        assert_ne!(x, y);
        assert_eq!(a.live_objects(), 2);
    }
}
