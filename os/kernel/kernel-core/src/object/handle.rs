use crate::object::{Arena, Holder, KernelObject, ObjectHeader, ObjectId, ObjectRef};
use alloc::sync::{Arc, Weak};
use core::fmt;
use core::ops::Deref;

/// Header plus body of one kernel object.
pub struct ObjectCell<T> {
    header: ObjectHeader,
    body: T,
}

impl<T> ObjectCell<T> {
    #[must_use]
    pub const fn header(&self) -> &ObjectHeader {
        &self.header
    }

    #[must_use]
    pub const fn body(&self) -> &T {
        &self.body
    }
}

/// Strong, move-only reference to a kernel object.
///
/// Each `Ref` is exactly one edge in the object's reference list. There is
/// no `Clone`: a second edge is made with [`Ref::clone_as`], naming its
/// holder. Dropping the edge is the only way to release it, so a reference
/// cannot be released twice.
pub struct Ref<T: KernelObject> {
    cell: Arc<ObjectCell<T>>,
    serial: u64,
    holder: Holder,
}

impl<T: KernelObject> Ref<T> {
    /// Allocates a new object and returns its first reference.
    pub(crate) fn create_with(
        arena: &Arc<Arena>,
        holder: Holder,
        permanent: bool,
        body: impl FnOnce(ObjectId) -> T,
    ) -> Self {
        let id = arena.allocate_id();
        let cell = Arc::new(ObjectCell {
            header: ObjectHeader::new(Arc::clone(arena), id, T::KIND, permanent),
            body: body(id),
        });
        let serial = cell.header.acquire(holder);
        log::trace!(target: "kernel::object", "created {}#{id} for {holder:?}", T::KIND);
        Self {
            cell,
            serial,
            holder,
        }
    }

    #[must_use]
    pub fn clone_as(&self, holder: Holder) -> Self {
        let serial = self.cell.header.acquire(holder);
        Self {
            cell: Arc::clone(&self.cell),
            serial,
            holder,
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakRef<T> {
        WeakRef {
            cell: Arc::downgrade(&self.cell),
            id: self.object_id(),
        }
    }

    #[must_use]
    pub fn header(&self) -> &ObjectHeader {
        &self.cell.header
    }

    /// Object id. Named apart from the body's own `id()` so thread and
    /// process ids stay reachable through `Deref`.
    #[must_use]
    pub fn object_id(&self) -> ObjectId {
        self.cell.header.id()
    }

    #[must_use]
    pub const fn holder(&self) -> Holder {
        self.holder
    }

    #[must_use]
    pub fn into_object(self) -> ObjectRef {
        T::into_object_ref(self)
    }

    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.cell, &b.cell)
    }
}

impl<T: KernelObject> Deref for Ref<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.cell.body
    }
}

impl<T: KernelObject> Drop for Ref<T> {
    fn drop(&mut self) {
        if self.cell.header.release(self.serial) {
            let arena = Arc::clone(self.cell.header.arena());
            arena.enqueue(T::reclaim(Arc::clone(&self.cell)));
        }
    }
}

impl<T: KernelObject> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ref({}#{} by {:?})", T::KIND, self.object_id(), self.holder)
    }
}

/// Reference that never keeps its object alive.
pub struct WeakRef<T: KernelObject> {
    cell: Weak<ObjectCell<T>>,
    id: ObjectId,
}

impl<T: KernelObject> WeakRef<T> {
    /// Creates a strong edge unless the object already reached zero.
    #[must_use]
    pub fn upgrade(&self, holder: Holder) -> Option<Ref<T>> {
        let cell = self.cell.upgrade()?;
        let serial = cell.header.try_acquire(holder)?;
        Some(Ref {
            cell,
            serial,
            holder,
        })
    }

    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    /// `true` while the object has not reached zero.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.cell
            .upgrade()
            .is_some_and(|c| !c.header.is_zeroed())
    }

    #[must_use]
    pub fn points_to(&self, strong: &Ref<T>) -> bool {
        Weak::as_ptr(&self.cell) == Arc::as_ptr(&strong.cell)
    }
}

impl<T: KernelObject> Clone for WeakRef<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Weak::clone(&self.cell),
            id: self.id,
        }
    }
}

impl<T: KernelObject> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakRef({}#{})", T::KIND, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::arena::tests::arena;
    use crate::object::{External, Reclaim};
    use std::sync::Barrier;
    use std::thread;

    fn external(arena: &Arc<Arena>) -> Ref<External> {
        Ref::create_with(arena, Holder::Kernel("test"), false, |_| {
            External::new(0, None, None)
        })
    }

    #[test]
    fn last_drop_queues_exactly_one_reclaim() {
        let arena = arena(1);
        let a = external(&arena);
        let b = a.clone_as(Holder::Scheduler);
        let c = b.clone_as(Holder::Dpc);
        drop(a);
        drop(c);
        assert!(!arena.has_pending(kernel_hal::CoreId(0)));
        drop(b);
        let queued: Vec<Reclaim> = arena.take(kernel_hal::CoreId(0)).collect();
        assert_eq!(queued.len(), 1);
        assert!(queued[0].header().is_zeroed());
    }

    #[test]
    fn weak_upgrade_fails_after_zero() {
        let arena = arena(1);
        let a = external(&arena);
        let weak = a.downgrade();
        assert!(weak.is_alive());
        let b = weak.upgrade(Holder::Scheduler).unwrap();
        drop(a);
        drop(b);
        // The reclaim entry keeps the cell, but no edge may be created.
        assert!(weak.upgrade(Holder::Scheduler).is_none());
        assert!(!weak.is_alive());
        drop(arena.take(kernel_hal::CoreId(0)));
        assert!(weak.upgrade(Holder::Scheduler).is_none());
    }

    #[test]
    fn concurrent_upgrades_race_one_release() {
        for _ in 0..50 {
            let arena = arena(1);
            let owner = external(&arena);
            let weak = owner.downgrade();
            let barrier = Arc::new(Barrier::new(5));

            let upgraders: Vec<_> = (0..4)
                .map(|_| {
                    let weak = weak.clone();
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        weak.upgrade(Holder::Kernel("racer")).is_some()
                    })
                })
                .collect();

            barrier.wait();
            drop(owner);
            let won: Vec<bool> = upgraders.into_iter().map(|h| h.join().unwrap()).collect();

            // However the race went, every winner has dropped its edge by now
            // and exactly one release reached zero.
            let queued = arena.take(kernel_hal::CoreId(0)).count();
            assert_eq!(queued, 1, "winners: {won:?}");
        }
    }

    #[test]
    fn typed_round_trip_through_object_ref() {
        let arena = arena(1);
        let a = external(&arena);
        let id = a.object_id();
        let obj = a.into_object();
        assert_eq!(obj.id(), id);
        assert!(obj.as_ref::<External>().is_some());
        let back = obj.downcast::<External>().unwrap();
        assert_eq!(back.object_id(), id);
    }
}
