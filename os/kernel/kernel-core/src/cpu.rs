//! # Per-core monitor
//!
//! Each core owns a [`Cpu`]: its run lists, its DPC queues and the inbound
//! channels other cores write to. The monitor ([`Kernel::monitor`]) is the
//! only code that touches the lists, so they sit behind a lock that is never
//! contended across cores.
//!
//! Inbound paths:
//!
//! | Channel | Written by | Drained |
//! |---------|------------|---------|
//! | `migrating` | the scheduler placing a thread | every monitor pass |
//! | `events` | trap and interrupt entry | every monitor pass |
//! | `inbox[sender]` | [`Kernel::send_xci`] | interrupt entry |
//! | arena reclaim queue | last `Ref` drop | every monitor pass |
//!
//! [`Kernel::monitor`]: crate::Kernel::monitor
//! [`Kernel::send_xci`]: crate::Kernel::send_xci

mod dpc;
mod event;
mod monitor;
mod stats;

pub use dpc::DpcPriority;
pub use stats::CpuStats;

pub(crate) use dpc::Dpc;
pub(crate) use event::Event;
pub(crate) use stats::{Counters, bump};

use crate::object::Ref;
use crate::process::Process;
use crate::thread::{Thread, ThreadId};
use crate::xci::{ShootdownJob, Xci};
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use kernel_hal::{CoreId, CoreMask};
use kernel_sync::{HandoffSlot, PushList, SpinLock};

/// What the core should do after a monitor pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreAction {
    /// Return to the thread now active on the core.
    RunThread(ThreadId),
    /// Deferred work is left; enter the monitor again.
    RunDpc,
    /// The pass limit was hit with work still arriving.
    Reschedule,
    /// Nothing to do until the next interrupt.
    Idle,
    Halted,
}

#[derive(Default)]
pub(crate) struct CpuLocal {
    /// Threads with quantum left in this epoch.
    pub run: VecDeque<Ref<Thread>>,
    /// Threads that used up their quantum in this epoch.
    pub ran: VecDeque<Ref<Thread>>,
    /// Arrived from the migrating list during this epoch.
    pub migrated: VecDeque<Ref<Thread>>,
    pub active: Option<Ref<Thread>>,
    pub dpcs: [VecDeque<Dpc>; 3],
    /// Process whose address space is loaded.
    pub mapped: Option<Ref<Process>>,
    /// Shootdowns this core initiated and still waits on.
    pub shootdowns: Vec<ShootdownJob>,
    /// Resends parked until a receiver empties its slot.
    pub stalled: Vec<Dpc>,
    pub epoch: u64,
}

impl CpuLocal {
    pub(crate) fn lists(&self) -> impl Iterator<Item = &Ref<Thread>> {
        self.run.iter().chain(&self.ran).chain(&self.migrated)
    }

    pub(crate) fn has_dpcs(&self) -> bool {
        self.dpcs.iter().any(|q| !q.is_empty())
    }
}

pub(crate) struct Cpu {
    id: CoreId,
    pub local: SpinLock<CpuLocal>,
    /// One slot per sending core.
    pub inbox: Box<[HandoffSlot<Xci>]>,
    pub migrating: PushList<Ref<Thread>>,
    pub events: PushList<Event>,
    thread_count: AtomicUsize,
    idle: AtomicBool,
    halted: AtomicBool,
    in_interrupt: AtomicBool,
    /// Tick at which the active thread's quantum is charged next; 0 if none.
    next_tick: AtomicU64,
    /// Receivers that refused a message from this core and owe it a doorbell
    /// once they empty the slot.
    awaiting_slot: AtomicU64,
    pub stats: Counters,
}

impl Cpu {
    pub(crate) fn new(id: CoreId, cores: usize) -> Self {
        Self {
            id,
            local: SpinLock::new(CpuLocal::default()),
            inbox: (0..cores).map(|_| HandoffSlot::new()).collect(),
            migrating: PushList::new(),
            events: PushList::new(),
            thread_count: AtomicUsize::new(0),
            idle: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            in_interrupt: AtomicBool::new(false),
            next_tick: AtomicU64::new(0),
            awaiting_slot: AtomicU64::new(0),
            stats: Counters::default(),
        }
    }

    pub(crate) const fn id(&self) -> CoreId {
        self.id
    }

    /// Threads placed on this core and not yet gone back to the scheduler.
    pub(crate) fn load(&self) -> usize {
        self.thread_count.load(Ordering::Acquire)
    }

    pub(crate) fn note_placed(&self) {
        self.thread_count.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn note_left(&self) {
        if self.thread_count.fetch_sub(1, Ordering::AcqRel) == 0 {
            fatal!("{:?}: thread count underflow", self.id);
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }

    fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::SeqCst);
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    pub(crate) fn halt(&self) {
        if !self.halted.swap(true, Ordering::AcqRel) {
            log::error!(target: "kernel::cpu", "{:?} halted", self.id);
        }
    }

    fn next_tick(&self) -> Option<u64> {
        match self.next_tick.load(Ordering::Acquire) {
            0 => None,
            t => Some(t),
        }
    }

    fn set_next_tick(&self, tick: Option<u64>) {
        self.next_tick.store(tick.unwrap_or(0), Ordering::Release);
    }

    pub(crate) fn await_slot(&self, receiver: CoreId, waiting: bool) {
        let bit = CoreMask::single(receiver).bits();
        if waiting {
            self.awaiting_slot.fetch_or(bit, Ordering::SeqCst);
        } else {
            self.awaiting_slot.fetch_and(!bit, Ordering::SeqCst);
        }
    }

    /// Clears `receiver` from the cores this one waits on. Returns whether
    /// it was set.
    pub(crate) fn slot_freed(&self, receiver: CoreId) -> bool {
        let bit = CoreMask::single(receiver).bits();
        self.awaiting_slot.fetch_and(!bit, Ordering::SeqCst) & bit != 0
    }

    /// Moves parked resends back to the medium queue. Returns whether any
    /// work was waiting on a busy slot.
    pub(crate) fn release_stalled(&self) -> bool {
        let mut guard = self.local.lock();
        let local = &mut *guard;
        let stalled = !local.stalled.is_empty();
        local.dpcs[DpcPriority::Medium.index()].extend(local.stalled.drain(..));
        stalled || local.shootdowns.iter().any(ShootdownJob::has_unsent)
    }

    pub(crate) fn active_thread(&self) -> Option<ThreadId> {
        self.local.lock().active.as_ref().map(|t| t.id())
    }

    pub(crate) fn push_dpc(&self, priority: DpcPriority, dpc: Dpc) {
        self.local.lock().dpcs[priority.index()].push_back(dpc);
    }

    fn pop_dpc(&self, priority: DpcPriority) -> Option<Dpc> {
        self.local.lock().dpcs[priority.index()].pop_front()
    }
}

impl fmt::Debug for Cpu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cpu")
            .field("id", &self.id)
            .field("load", &self.load())
            .field("idle", &self.is_idle())
            .field("halted", &self.is_halted())
            .finish_non_exhaustive()
    }
}
