//! Mock platform for exercising the kernel core on a host.
//!
//! [`MockPlatform`] implements every `kernel-hal` trait with plain in-memory
//! state: a page pool with a fixed budget, a page-table map per address space,
//! a pending-interrupt queue per core and a manually advanced clock. Tests
//! drive simulated cores explicitly; [`MockPlatform::enter_core`] tells the
//! platform which core the calling host thread is impersonating.

use kernel_hal::{
    AddressSpaceId, CoreId, CoreLocator, CoreMask, HalError, HighFrequencyTimer,
    InterruptController, InterruptId, PAGE_SIZE, PageAllocator, PageAttributes, PageTables,
    PhysicalAddress, PhysicalRange, Reservation, TIMER_VECTOR, VirtualAddress, XCI_VECTOR,
};
use kernel_sync::InterruptControl;
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// First frame handed out; keeps physical address zero unused.
const FIRST_FRAME: u64 = 0x10_0000;

thread_local! {
    static CURRENT_CORE: Cell<Option<CoreId>> = const { Cell::new(None) };
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A TLB invalidation observed by the page-table layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalidation {
    pub core: CoreId,
    pub space: AddressSpaceId,
    pub va: VirtualAddress,
}

#[derive(Default)]
struct PagePool {
    budget: usize,
    next_frame: u64,
    allocated: BTreeMap<u64, usize>,
    reserved: usize,
    freed: Vec<PhysicalRange>,
}

impl PagePool {
    fn in_use(&self) -> usize {
        self.allocated.values().sum::<usize>() + self.reserved
    }

    fn carve(&mut self, n: usize) -> PhysicalRange {
        let start = self.next_frame;
        self.next_frame += n as u64 * PAGE_SIZE;
        self.allocated.insert(start, n);
        PhysicalRange::new(PhysicalAddress::new(start), n)
    }
}

#[derive(Default)]
struct Tables {
    entries: BTreeMap<(AddressSpaceId, VirtualAddress), (PhysicalAddress, PageAttributes)>,
    invalidations: Vec<Invalidation>,
    active: BTreeMap<CoreId, AddressSpaceId>,
}

#[derive(Default)]
struct Irqs {
    pending: Vec<VecDeque<InterruptId>>,
    enabled: BTreeSet<InterruptId>,
    eoi: Vec<(CoreId, InterruptId)>,
    directed_sent: u64,
}

#[derive(Default)]
struct Clock {
    now: u64,
    deadlines: Vec<Option<u64>>,
}

pub struct MockPlatform {
    cores: usize,
    pages: Mutex<PagePool>,
    tables: Mutex<Tables>,
    irqs: Mutex<Irqs>,
    clock: Mutex<Clock>,
}

/// Restores the previously impersonated core on drop.
pub struct CoreGuard {
    previous: Option<CoreId>,
}

impl Drop for CoreGuard {
    fn drop(&mut self) {
        CURRENT_CORE.with(|c| c.set(self.previous));
    }
}

impl MockPlatform {
    #[must_use]
    pub fn new(cores: usize, page_budget: usize) -> Self {
        Self {
            cores,
            pages: Mutex::new(PagePool {
                budget: page_budget,
                next_frame: FIRST_FRAME,
                ..PagePool::default()
            }),
            tables: Mutex::new(Tables::default()),
            irqs: Mutex::new(Irqs {
                pending: vec![VecDeque::new(); cores],
                ..Irqs::default()
            }),
            clock: Mutex::new(Clock {
                now: 0,
                deadlines: vec![None; cores],
            }),
        }
    }

    #[must_use]
    pub const fn core_count(&self) -> usize {
        self.cores
    }

    /// Impersonates `core` on the calling host thread until the guard drops.
    #[must_use]
    pub fn enter_core(&self, core: CoreId) -> CoreGuard {
        let previous = CURRENT_CORE.with(|c| c.replace(Some(core)));
        CoreGuard { previous }
    }

    /* ------------------------------ clock ------------------------------ */

    /// Moves the clock forward and raises the timer vector on every core
    /// whose deadline has passed.
    pub fn advance(&self, delta: u64) {
        let expired = {
            let mut clock = lock(&self.clock);
            clock.now += delta;
            let now = clock.now;
            let mut expired = Vec::new();
            for (i, d) in clock.deadlines.iter_mut().enumerate() {
                if d.is_some_and(|d| d <= now) {
                    *d = None;
                    expired.push(i);
                }
            }
            expired
        };
        let mut irqs = lock(&self.irqs);
        for i in expired {
            irqs.pending[i].push_back(TIMER_VECTOR);
        }
    }

    #[must_use]
    pub fn armed_deadline(&self, core: CoreId) -> Option<u64> {
        lock(&self.clock).deadlines[core.index()]
    }

    /* ---------------------------- interrupts ---------------------------- */

    /// Asserts a device line on `core`. Masked lines are dropped.
    pub fn raise(&self, core: CoreId, id: InterruptId) -> bool {
        let mut irqs = lock(&self.irqs);
        if !irqs.enabled.contains(&id) {
            return false;
        }
        irqs.pending[core.index()].push_back(id);
        true
    }

    #[must_use]
    pub fn pending_interrupts(&self, core: CoreId) -> Vec<InterruptId> {
        lock(&self.irqs).pending[core.index()]
            .iter()
            .copied()
            .collect()
    }

    #[must_use]
    pub fn has_pending_interrupts(&self) -> bool {
        lock(&self.irqs)
            .pending
            .iter()
            .any(|q| !q.is_empty())
    }

    #[must_use]
    pub fn is_line_enabled(&self, id: InterruptId) -> bool {
        lock(&self.irqs).enabled.contains(&id)
    }

    #[must_use]
    pub fn end_of_interrupt_log(&self) -> Vec<(CoreId, InterruptId)> {
        lock(&self.irqs).eoi.clone()
    }

    #[must_use]
    pub fn directed_interrupts_sent(&self) -> u64 {
        lock(&self.irqs).directed_sent
    }

    /* ------------------------------ memory ------------------------------ */

    #[must_use]
    pub fn pages_in_use(&self) -> usize {
        lock(&self.pages).in_use()
    }

    #[must_use]
    pub fn freed_ranges(&self) -> Vec<PhysicalRange> {
        lock(&self.pages).freed.clone()
    }

    #[must_use]
    pub fn is_allocated(&self, range: PhysicalRange) -> bool {
        lock(&self.pages).allocated.get(&range.start.as_u64()) == Some(&range.pages)
    }

    #[must_use]
    pub fn translation(
        &self,
        space: AddressSpaceId,
        va: VirtualAddress,
    ) -> Option<PhysicalAddress> {
        lock(&self.tables)
            .entries
            .get(&(space, va))
            .map(|(pa, _)| *pa)
    }

    #[must_use]
    pub fn mapping_count(&self) -> usize {
        lock(&self.tables).entries.len()
    }

    #[must_use]
    pub fn invalidations(&self) -> Vec<Invalidation> {
        lock(&self.tables).invalidations.clone()
    }

    #[must_use]
    pub fn active_space(&self, core: CoreId) -> Option<AddressSpaceId> {
        lock(&self.tables).active.get(&core).copied()
    }
}

impl PageAllocator for MockPlatform {
    fn alloc_pages(&self, n: usize) -> Result<PhysicalRange, HalError> {
        let mut pool = lock(&self.pages);
        if pool.in_use() + n > pool.budget {
            return Err(HalError::OutOfPages);
        }
        Ok(pool.carve(n))
    }

    fn free_pages(&self, range: PhysicalRange) {
        let mut pool = lock(&self.pages);
        let known = pool.allocated.remove(&range.start.as_u64());
        assert_eq!(known, Some(range.pages), "freeing {range:?} that was never allocated");
        pool.freed.push(range);
    }

    fn reserve(&self, n: usize) -> Result<Reservation, HalError> {
        let mut pool = lock(&self.pages);
        if pool.in_use() + n > pool.budget {
            return Err(HalError::OutOfPages);
        }
        pool.reserved += n;
        Ok(Reservation::new(n))
    }

    fn alloc_from_reservation(
        &self,
        reservation: &mut Reservation,
        n: usize,
    ) -> Result<PhysicalRange, HalError> {
        reservation.consume(n)?;
        let mut pool = lock(&self.pages);
        pool.reserved -= n;
        Ok(pool.carve(n))
    }

    fn release_reservation(&self, reservation: Reservation) {
        lock(&self.pages).reserved -= reservation.remaining();
    }
}

impl PageTables for MockPlatform {
    fn map(
        &self,
        space: AddressSpaceId,
        va: VirtualAddress,
        pa: PhysicalAddress,
        attrs: PageAttributes,
    ) -> Result<(), HalError> {
        let mut t = lock(&self.tables);
        if t.entries.contains_key(&(space, va)) {
            return Err(HalError::AlreadyMapped(va));
        }
        t.entries.insert((space, va), (pa, attrs));
        Ok(())
    }

    fn unmap(
        &self,
        space: AddressSpaceId,
        va: VirtualAddress,
    ) -> Result<PhysicalAddress, HalError> {
        lock(&self.tables)
            .entries
            .remove(&(space, va))
            .map(|(pa, _)| pa)
            .ok_or(HalError::NotMapped(va))
    }

    fn invalidate_tlb_entry(&self, core: CoreId, space: AddressSpaceId, va: VirtualAddress) {
        lock(&self.tables)
            .invalidations
            .push(Invalidation { core, space, va });
    }

    fn activate(&self, core: CoreId, space: AddressSpaceId) {
        lock(&self.tables).active.insert(core, space);
    }
}

impl InterruptController for MockPlatform {
    fn ack(&self, core: CoreId) -> Option<InterruptId> {
        lock(&self.irqs).pending[core.index()].pop_front()
    }

    fn end_of_interrupt(&self, core: CoreId, id: InterruptId) {
        lock(&self.irqs).eoi.push((core, id));
    }

    fn set_enable(&self, id: InterruptId, enabled: bool) {
        let mut irqs = lock(&self.irqs);
        if enabled {
            irqs.enabled.insert(id);
        } else {
            irqs.enabled.remove(&id);
        }
    }

    fn send_directed_interrupt(&self, targets: CoreMask, vector: InterruptId) {
        debug_assert!(vector == XCI_VECTOR || vector == TIMER_VECTOR);
        let mut irqs = lock(&self.irqs);
        for core in targets {
            if core.index() < self.cores {
                irqs.pending[core.index()].push_back(vector);
                irqs.directed_sent += 1;
            }
        }
    }
}

impl HighFrequencyTimer for MockPlatform {
    fn read_tick(&self) -> u64 {
        lock(&self.clock).now
    }

    fn arm(&self, core: CoreId, delta: u64) {
        let mut clock = lock(&self.clock);
        let deadline = clock.now + delta.max(1);
        clock.deadlines[core.index()] = Some(deadline);
    }

    fn disarm(&self, core: CoreId) {
        lock(&self.clock).deadlines[core.index()] = None;
    }
}

impl CoreLocator for MockPlatform {
    fn current_core(&self) -> Option<CoreId> {
        CURRENT_CORE.with(Cell::get)
    }
}

impl InterruptControl for MockPlatform {
    fn interrupts_enabled(&self) -> bool {
        IRQ_ENABLED.with(Cell::get)
    }

    fn disable_interrupts(&self) {
        IRQ_ENABLED.with(|c| c.set(false));
    }

    fn enable_interrupts(&self) {
        IRQ_ENABLED.with(|c| c.set(true));
    }
}
