//! The boot-time kernel context and its public surface.

use crate::config::{ConfigError, KernelConfig};
use crate::cpu::{Cpu, CpuStats, Event};
use crate::error::{KernelError, SyscallError};
use crate::ipc::InterfaceRegistry;
use crate::memory::{MapSpec, PageArray, VaAllocator, VirtualMap};
use crate::object::{Arena, External, Holder, ObjectRef, Ref, WeakRef};
use crate::process::{Process, ProcessId, ProcessLifecycle, ProcessSpec};
use crate::sched::{KernelOp, RequestKind, Scheduler};
use crate::sync::{
    Alarm, Gate, GateMode, Interrupt, Mailbox, MailboxOwner, Mailslot, Notify, NotifyProxy,
    Semaphore, SemaphoreUser,
};
use crate::syscall::RawSyscall;
use crate::thread::{Fault, Thread, ThreadEvent, ThreadId, ThreadSpec};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use kernel_hal::{
    AddressSpaceId, CoreId, CoreLocator, CoreMask, InterruptId, PageAttributes, Platform,
    Reservation,
};
use kernel_sync::SpinLock;

/// Holder tag of references handed out through the public API.
const API: Holder = Holder::Kernel("api");

/// Everything one boot of the kernel core owns.
///
/// Cores are driven from outside: interrupt entry calls
/// [`service_interrupts`](Self::service_interrupts), traps queue events with
/// [`syscall`](Self::syscall) / [`exception`](Self::exception), and the core
/// then runs [`monitor`](Self::monitor) until it has something to do.
pub struct Kernel<P: Platform> {
    pub(crate) config: KernelConfig,
    pub(crate) platform: Arc<P>,
    pub(crate) arena: Arc<Arena>,
    pub(crate) cores: Box<[Cpu]>,
    pub(crate) sched: Scheduler,
    kernel_process: Ref<Process>,
    /// Every thread not yet reclaimed.
    pub(crate) threads: SpinLock<BTreeMap<ThreadId, WeakRef<Thread>>>,
    thread_slots: AtomicUsize,
    next_thread: AtomicU64,
    next_process: AtomicU64,
    next_space: AtomicU32,
    pub(crate) irq_table: SpinLock<BTreeMap<InterruptId, WeakRef<Interrupt>>>,
    pub(crate) interfaces: SpinLock<InterfaceRegistry>,
}

impl<P: Platform> Kernel<P> {
    /// Boots the kernel core on `platform`.
    ///
    /// # Errors
    /// The configuration cannot run.
    pub fn new(config: KernelConfig, platform: Arc<P>) -> Result<Self, ConfigError> {
        config.validate()?;
        let locator: Arc<dyn CoreLocator> = Arc::clone(&platform) as Arc<dyn CoreLocator>;
        let arena = Arena::new(config.cores, config.scheduling_core, locator);
        let cores = (0..config.cores)
            .map(|i| Cpu::new(CoreId(i as u32), config.cores))
            .collect();
        let kernel_process = Process::create(
            &arena,
            Holder::Kernel("boot"),
            ProcessSpec {
                id: ProcessId(0),
                name: "kernel",
                space: AddressSpaceId::KERNEL,
                va: VaAllocator::kernel(),
            },
        );
        log::info!(
            target: "kernel",
            "kernel core up: {} cores, scheduling on {:?}",
            config.cores,
            config.scheduling_core
        );
        Ok(Self {
            config,
            platform,
            arena,
            cores,
            sched: Scheduler::new(),
            kernel_process,
            threads: SpinLock::new(BTreeMap::new()),
            thread_slots: AtomicUsize::new(0),
            next_thread: AtomicU64::new(1),
            next_process: AtomicU64::new(1),
            next_space: AtomicU32::new(1),
            irq_table: SpinLock::new(BTreeMap::new()),
            interfaces: SpinLock::new(InterfaceRegistry::default()),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &KernelConfig {
        &self.config
    }

    #[must_use]
    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub(crate) fn cpu(&self, core: CoreId) -> &Cpu {
        match self.cores.get(core.index()) {
            Some(cpu) => cpu,
            None => fatal!("{core:?} is not a configured core"),
        }
    }

    /// The permanent process kernel threads belong to.
    #[must_use]
    pub const fn kernel_process(&self) -> &Ref<Process> {
        &self.kernel_process
    }

    /// Creates a user process with its own address space and no threads.
    pub fn create_process(&self, name: &str) -> Ref<Process> {
        let id = ProcessId(self.next_process.fetch_add(1, Ordering::Relaxed));
        let space = AddressSpaceId(self.next_space.fetch_add(1, Ordering::Relaxed));
        log::debug!(target: "kernel::process", "{id} ({name}) created in {space:?}");
        Process::create(
            &self.arena,
            API,
            ProcessSpec {
                id,
                name,
                space,
                va: VaAllocator::user(),
            },
        )
    }

    /// Creates a thread of `process` and hands it to the scheduler.
    ///
    /// # Errors
    /// No thread slot or memory for the stack, or the process is stopping.
    pub fn spawn_thread(
        &self,
        process: &Ref<Process>,
        entry: u64,
        arg: u64,
    ) -> Result<Ref<Thread>, KernelError> {
        self.spawn(process, entry, arg, CoreMask::first(self.config.cores))
    }

    /// Creates a kernel thread restricted to `affinity`.
    ///
    /// # Errors
    /// As [`spawn_thread`](Self::spawn_thread).
    pub fn spawn_kernel_thread(
        &self,
        entry: u64,
        arg: u64,
        affinity: CoreMask,
    ) -> Result<Ref<Thread>, KernelError> {
        let affinity = affinity.intersect(CoreMask::first(self.config.cores));
        let affinity = if affinity.is_empty() {
            CoreMask::first(self.config.cores)
        } else {
            affinity
        };
        self.spawn(&self.kernel_process, entry, arg, affinity)
    }

    fn spawn(
        &self,
        process: &Ref<Process>,
        entry: u64,
        arg: u64,
        affinity: CoreMask,
    ) -> Result<Ref<Thread>, KernelError> {
        let thread = self.new_thread(process, entry, arg, affinity)?;
        self.enqueue(RequestKind::StartThread(thread.clone_as(Holder::Scheduler)));
        Ok(thread.clone_as(API))
    }

    /// Allocates a thread in `Created` with its stack (and TLS for user
    /// threads) mapped.
    pub(crate) fn new_thread(
        &self,
        process: &Ref<Process>,
        entry: u64,
        arg: u64,
        affinity: CoreMask,
    ) -> Result<Ref<Thread>, KernelError> {
        if process.lifecycle() != ProcessLifecycle::Running {
            return Err(KernelError::ProcessStopping);
        }
        self.claim_thread_slot()?;
        let (stack, tls) = match self.map_thread_memory(process) {
            Ok(memory) => memory,
            Err(e) => {
                self.release_thread_slot();
                return Err(e);
            }
        };

        // From here on the slot is returned by the thread's cleanup.
        let id = ThreadId(self.next_thread.fetch_add(1, Ordering::Relaxed));
        let thread = Thread::create(
            &self.arena,
            Holder::Scheduler,
            ThreadSpec {
                id,
                process: process.clone_as(Holder::Thread(id)),
                entry,
                arg,
                affinity,
            },
        );
        if process.is_kernel() {
            thread.apply(ThreadEvent::SkipPrep);
        }
        thread.attach_stack(stack, tls);
        thread.apply(ThreadEvent::Prepared);
        self.threads.lock().insert(id, thread.downgrade());
        process.add_thread(&thread)?;
        log::debug!(target: "kernel::thread", "{id} created in {} at {entry:#x}", process.id());
        Ok(thread)
    }

    fn claim_thread_slot(&self) -> Result<(), KernelError> {
        self.thread_slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                (used < self.config.max_threads).then_some(used + 1)
            })
            .map(|_| ())
            .map_err(|_| {
                log::warn!(
                    target: "kernel::thread",
                    "all {} thread slots in use",
                    self.config.max_threads,
                );
                KernelError::OutOfThreadSlots
            })
    }

    pub(crate) fn release_thread_slot(&self) {
        if self.thread_slots.fetch_sub(1, Ordering::AcqRel) == 0 {
            fatal!("thread slot count underflow");
        }
    }

    fn map_thread_memory(
        &self,
        process: &Process,
    ) -> Result<(Ref<VirtualMap>, Option<Ref<VirtualMap>>), KernelError> {
        let stack_pages = self.config.stack_pages;
        let tls_pages = if process.is_kernel() { 0 } else { self.config.tls_pages };
        let mut reservation = self
            .platform
            .reserve(stack_pages + tls_pages)
            .map_err(KernelError::from_hal)?;
        let mapped = self
            .map_pages(process, &mut reservation, stack_pages)
            .and_then(|stack| {
                let tls = match tls_pages {
                    0 => None,
                    n => Some(self.map_pages(process, &mut reservation, n)?),
                };
                Ok((stack, tls))
            });
        self.platform.release_reservation(reservation);
        mapped
    }

    /// Backs `pages` fresh pages of the process window from `reservation`.
    fn map_pages(
        &self,
        process: &Process,
        reservation: &mut Reservation,
        pages: usize,
    ) -> Result<Ref<VirtualMap>, KernelError> {
        let base = process.allocate_va(pages)?;
        let range = self
            .platform
            .alloc_from_reservation(reservation, pages)
            .map_err(KernelError::from_hal)?;
        let backing = PageArray::create(&self.arena, Holder::Kernel("map"), range);
        let attrs = if process.is_kernel() {
            PageAttributes::kernel_data()
        } else {
            PageAttributes::user_data()
        };
        for page in 0..pages {
            self.platform
                .map(process.space(), base.page_offset(page as u64), range.page(page), attrs)
                .map_err(KernelError::from_hal)?;
        }
        let spec = MapSpec {
            space: process.space(),
            owner: (!process.is_kernel()).then(|| process.id()),
            base,
            attrs,
        };
        Ok(VirtualMap::create(&self.arena, Holder::Kernel("map"), spec, &backing))
    }

    /// Looks up a thread that has not been reclaimed yet.
    #[must_use]
    pub fn thread(&self, id: ThreadId) -> Option<Ref<Thread>> {
        self.threads.lock().get(&id).and_then(|t| t.upgrade(API))
    }

    /// Number of threads holding a slot.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.thread_slots.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn active_thread(&self, core: CoreId) -> Option<ThreadId> {
        self.cpu(core).active_thread()
    }

    /// Threads placed on `core`.
    #[must_use]
    pub fn core_load(&self, core: CoreId) -> usize {
        self.cpu(core).load()
    }

    /// Trap entry: `thread`, running on `core`, issued a syscall.
    pub fn syscall(&self, core: CoreId, thread: ThreadId, raw: RawSyscall) {
        self.cpu(core).events.push(Event::Syscall { thread, raw });
    }

    /// A kernel thread running on `core` asks for a scheduler operation.
    /// The outcome is read with [`Thread::take_kernel_result`].
    pub fn kernel_op(&self, core: CoreId, thread: ThreadId, op: KernelOp) {
        self.cpu(core).events.push(Event::KernelOp { thread, op });
    }

    /// Exception entry: `thread` faulted on `core`.
    pub fn exception(&self, core: CoreId, thread: ThreadId, fault: Fault) {
        self.cpu(core).events.push(Event::Exception { thread, fault });
    }

    /// Starts tearing `process` down with `code`.
    pub fn kill_process(&self, process: &Ref<Process>, code: i64) {
        self.enqueue(RequestKind::StopProcess {
            process: process.clone_as(Holder::Scheduler),
            code,
        });
    }

    /// Crashing threads of a process with a debugger are held instead of
    /// taking the process down.
    pub fn attach_debugger(&self, process: &Process, attached: bool) {
        process.with_state(|s| s.debugger_attached = attached);
    }

    /// Lets the threads held for the debugger finish crashing.
    pub fn release_debug_hold(&self, process: &Ref<Process>) {
        self.enqueue(RequestKind::DebugRelease(process.clone_as(Holder::Scheduler)));
    }

    /// Completes the pending I/O request of a thread in `InIo`.
    pub fn complete_io(&self, thread: ThreadId, result: Result<u64, SyscallError>) {
        self.enqueue(RequestKind::IoComplete { thread, result });
    }

    /// Signals a gate, notify, notify proxy or semaphore from outside any
    /// thread.
    pub fn signal(&self, object: &ObjectRef) {
        self.enqueue(RequestKind::Signal(object.clone_as(Holder::Scheduler)));
    }

    pub fn create_gate(&self, mode: GateMode, open: bool) -> Ref<Gate> {
        Gate::create(&self.arena, API, mode, open)
    }

    pub fn create_notify(&self) -> Ref<Notify> {
        Notify::create(&self.arena, API)
    }

    /// A proxy that signals `target` while it lives and fails afterwards.
    pub fn create_notify_proxy(&self, target: &Ref<Notify>) -> Ref<NotifyProxy> {
        NotifyProxy::create(&self.arena, API, target)
    }

    /// # Errors
    /// [`SyscallError::InvalidArgument`] for `max == 0` or `initial > max`.
    pub fn create_semaphore(&self, initial: u32, max: u32) -> Result<Ref<Semaphore>, SyscallError> {
        Semaphore::create(&self.arena, API, initial, max)
    }

    /// An accounting handle; counts it still holds return on cleanup.
    pub fn create_semaphore_user(&self, semaphore: &Ref<Semaphore>) -> Ref<SemaphoreUser> {
        SemaphoreUser::create(&self.arena, API, semaphore)
    }

    /// Creates a mailbox and returns its receiving and sending ends.
    ///
    /// # Errors
    /// [`SyscallError::InvalidArgument`] for a capacity outside
    /// `1..=mailbox_capacity_limit`.
    pub fn create_mailbox(
        &self,
        capacity: u32,
    ) -> Result<(Ref<MailboxOwner>, Ref<Mailslot>), SyscallError> {
        if capacity == 0 || capacity as usize > self.config.mailbox_capacity_limit {
            return Err(SyscallError::InvalidArgument);
        }
        let mailbox = Mailbox::create(&self.arena, API, capacity);
        Ok((
            MailboxOwner::create(&self.arena, API, &mailbox),
            Mailslot::create(&self.arena, API, &mailbox),
        ))
    }

    /// Another sending end of the mailbox `owner` receives from.
    pub fn create_mailslot(&self, owner: &MailboxOwner) -> Ref<Mailslot> {
        Mailslot::create(&self.arena, API, owner.mailbox())
    }

    pub fn create_alarm(&self) -> Ref<Alarm> {
        Alarm::create(&self.arena, API)
    }

    /// Wraps an object whose cleanup belongs to another subsystem.
    pub fn create_external(&self, external: External) -> Ref<External> {
        Ref::create_with(&self.arena, API, false, |_| external)
    }

    #[must_use]
    pub fn stats(&self, core: CoreId) -> CpuStats {
        self.cpu(core).stats.snapshot()
    }

    /// The scheduler's logical clock.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.sched.state.lock().now
    }

    /// Earliest scheduler timer, as last published.
    #[must_use]
    pub fn next_timer_deadline(&self) -> Option<u64> {
        self.sched.next_deadline()
    }

    /// Scheduler requests dispatched since boot.
    #[must_use]
    pub fn scheduler_dispatched(&self) -> u64 {
        self.sched.dispatched()
    }

    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.arena.live_objects()
    }

    /// Objects whose cleanup has run.
    #[must_use]
    pub fn reclaimed_objects(&self) -> u64 {
        self.arena.reclaimed()
    }

    /// Whether no core has queued work: no scheduler requests, events,
    /// migrating threads, DPCs, reclaims, shootdowns or undelivered messages.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        !self.sched.has_requests()
            && self.cores.iter().all(|cpu| {
                let id = cpu.id();
                let local = cpu.local.lock();
                cpu.events.is_empty()
                    && cpu.migrating.is_empty()
                    && !self.arena.has_pending(id)
                    && !local.has_dpcs()
                    && local.shootdowns.is_empty()
                    && local.stalled.is_empty()
                    && cpu.inbox.iter().all(|slot| !slot.is_full())
            })
    }
}
