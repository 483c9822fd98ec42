use crate::{
    AddressSpaceId, CoreId, HalError, PageAttributes, PhysicalAddress, PhysicalRange,
    VirtualAddress,
};

/// Pages set aside against the global budget, consumed by
/// [`PageAllocator::alloc_from_reservation`].
///
/// Move-only; hand it back through [`PageAllocator::release_reservation`] to
/// return what is left.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "unreleased reservations leak budget"]
pub struct Reservation {
    remaining: usize,
}

impl Reservation {
    /// Only allocators create reservations.
    pub const fn new(pages: usize) -> Self {
        Self { remaining: pages }
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.remaining
    }

    /// Consumes `pages` from the reservation.
    ///
    /// # Errors
    /// Fails if fewer than `pages` remain.
    pub const fn consume(&mut self, pages: usize) -> Result<(), HalError> {
        if pages > self.remaining {
            return Err(HalError::ReservationExhausted { requested: pages });
        }
        self.remaining -= pages;
        Ok(())
    }
}

/// Physical page frame allocator.
pub trait PageAllocator {
    /// Allocates `n` contiguous pages.
    ///
    /// # Errors
    /// [`HalError::OutOfPages`] when the budget is exhausted.
    fn alloc_pages(&self, n: usize) -> Result<PhysicalRange, HalError>;

    /// Returns pages obtained from this allocator.
    fn free_pages(&self, range: PhysicalRange);

    /// Sets `n` pages aside so later allocations cannot fail.
    ///
    /// # Errors
    /// [`HalError::OutOfPages`] when the budget cannot cover `n`.
    fn reserve(&self, n: usize) -> Result<Reservation, HalError>;

    /// Allocates `n` pages previously set aside by `reservation`.
    ///
    /// # Errors
    /// [`HalError::ReservationExhausted`] if the reservation is too small.
    fn alloc_from_reservation(
        &self,
        reservation: &mut Reservation,
        n: usize,
    ) -> Result<PhysicalRange, HalError>;

    /// Returns the unused part of `reservation` to the budget.
    fn release_reservation(&self, reservation: Reservation);
}

/// Page-table layer. Every operation is local to the named space or core.
pub trait PageTables {
    /// Installs one 4 KiB translation.
    ///
    /// # Errors
    /// [`HalError::AlreadyMapped`] if `va` is present.
    fn map(
        &self,
        space: AddressSpaceId,
        va: VirtualAddress,
        pa: PhysicalAddress,
        attrs: PageAttributes,
    ) -> Result<(), HalError>;

    /// Removes one translation and returns the frame it pointed to.
    ///
    /// # Errors
    /// [`HalError::NotMapped`] if `va` is absent.
    fn unmap(&self, space: AddressSpaceId, va: VirtualAddress) -> Result<PhysicalAddress, HalError>;

    /// Drops any cached translation of `va` on `core`.
    fn invalidate_tlb_entry(&self, core: CoreId, space: AddressSpaceId, va: VirtualAddress);

    /// Makes `space` the active user address space on `core`.
    fn activate(&self, core: CoreId, space: AddressSpaceId);
}
