//! Page arrays, virtual mappings and virtual address allocation.
//!
//! A [`VirtualMap`] owns its [`PageArray`] through a reference. Tearing the
//! map down unmaps it locally and then keeps that reference alive inside a
//! shootdown DPC until every other core acknowledged the invalidation; only
//! then can the page array reach zero and return its frames.

use crate::error::KernelError;
use crate::object::{Arena, Holder, Ref};
use crate::process::ProcessId;
use alloc::sync::Arc;
use kernel_hal::{AddressSpaceId, PAGE_SIZE, PageAttributes, PhysicalRange, VirtualAddress};
use kernel_sync::SpinLock;

/// Bottom of the per-process user window.
pub const USER_BASE: u64 = 0x0000_0040_0000_0000;
pub const USER_END: u64 = 0x0000_7fff_0000_0000;

/// Window used for kernel-thread stacks.
pub const KERNEL_BASE: u64 = 0xffff_c000_0000_0000;
pub const KERNEL_END: u64 = 0xffff_d000_0000_0000;

/// Bump allocator over a page-aligned window. Virtual ranges are not reused;
/// a 64-bit window is large enough for the lifetime of one address space.
#[derive(Debug, Clone)]
pub(crate) struct VaAllocator {
    next: u64,
    end: u64,
}

impl VaAllocator {
    pub(crate) const fn new(base: u64, end: u64) -> Self {
        Self { next: base, end }
    }

    pub(crate) const fn user() -> Self {
        Self::new(USER_BASE, USER_END)
    }

    pub(crate) const fn kernel() -> Self {
        Self::new(KERNEL_BASE, KERNEL_END)
    }

    /// Reserves `pages` plus one unmapped guard page in front.
    pub(crate) fn allocate(&mut self, pages: usize) -> Result<VirtualAddress, KernelError> {
        let bytes = (pages as u64 + 1)
            .checked_mul(PAGE_SIZE)
            .ok_or(KernelError::OutOfAddressSpace)?;
        let end = self
            .next
            .checked_add(bytes)
            .filter(|&e| e <= self.end)
            .ok_or_else(|| {
                log::warn!(
                    target: "kernel::memory",
                    "no room for {pages} pages at {:#x}",
                    self.next,
                );
                KernelError::OutOfAddressSpace
            })?;
        let base = VirtualAddress::new(self.next + PAGE_SIZE);
        self.next = end;
        Ok(base)
    }
}

/// A run of physical frames owned by the kernel.
#[derive(Debug)]
pub struct PageArray {
    range: PhysicalRange,
}

impl PageArray {
    pub(crate) fn create(arena: &Arc<Arena>, holder: Holder, range: PhysicalRange) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |_| Self { range })
    }

    #[must_use]
    pub const fn range(&self) -> PhysicalRange {
        self.range
    }
}

/// Pages of a [`PageArray`] mapped at a fixed place in one address space.
#[derive(Debug)]
pub struct VirtualMap {
    space: AddressSpaceId,
    owner: Option<ProcessId>,
    base: VirtualAddress,
    pages: usize,
    attrs: PageAttributes,
    backing: SpinLock<Option<Ref<PageArray>>>,
}

pub(crate) struct MapSpec {
    pub space: AddressSpaceId,
    pub owner: Option<ProcessId>,
    pub base: VirtualAddress,
    pub attrs: PageAttributes,
}

impl VirtualMap {
    /// Wraps pages that are already installed in the page tables.
    pub(crate) fn create(
        arena: &Arc<Arena>,
        holder: Holder,
        spec: MapSpec,
        backing: &Ref<PageArray>,
    ) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |id| Self {
            space: spec.space,
            owner: spec.owner,
            base: spec.base,
            pages: backing.range().pages,
            attrs: spec.attrs,
            backing: SpinLock::new(Some(backing.clone_as(Holder::Object(id)))),
        })
    }

    #[must_use]
    pub const fn space(&self) -> AddressSpaceId {
        self.space
    }

    #[must_use]
    pub const fn owner(&self) -> Option<ProcessId> {
        self.owner
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
    pub const fn attributes(&self) -> PageAttributes {
        self.attrs
    }

    #[must_use]
    pub fn physical(&self) -> Option<PhysicalRange> {
        self.backing.lock().as_ref().map(|b| b.range())
    }

    pub(crate) fn take_backing(&self) -> Option<Ref<PageArray>> {
        self.backing.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_leave_guard_pages() {
        let mut va = VaAllocator::new(0x1000, 0x1000 + 8 * PAGE_SIZE);
        let a = va.allocate(2).unwrap();
        let b = va.allocate(2).unwrap();
        assert_eq!(a.as_u64(), 0x2000);
        assert_eq!(b.as_u64(), a.as_u64() + 3 * PAGE_SIZE);
        assert_eq!(va.allocate(4), Err(KernelError::OutOfAddressSpace));
        assert!(va.allocate(1).is_ok());
    }
}
