//! A simulated machine: the kernel core on a mock platform, with every core
//! driven explicitly from the test thread.

#![allow(dead_code)]

use kernel_core::{
    CoreAction, Fault, Kernel, KernelConfig, KernelOp, KernelOpResult, Process, Ref, Syscall,
    SyscallError, Thread, ThreadState,
};
use kernel_hal::CoreId;
use kernel_hal_mock::MockPlatform;
use kernel_log::{CaptureSink, SinkLogger};
use log::LevelFilter;
use std::sync::Arc;

pub static LOGGER: SinkLogger<CaptureSink> =
    SinkLogger::new(LevelFilter::Debug, CaptureSink::new(4096));

/// Rounds of all cores before a scenario counts as livelocked.
const SETTLE_ROUNDS: usize = 1_000;

pub const PAGE_BUDGET: usize = 4_096;

pub struct Machine {
    pub platform: Arc<MockPlatform>,
    pub kernel: Kernel<MockPlatform>,
}

impl Machine {
    pub fn new(cores: usize) -> Self {
        Self::with_config(KernelConfig::with_cores(cores), PAGE_BUDGET)
    }

    pub fn with_config(config: KernelConfig, page_budget: usize) -> Self {
        let _ = LOGGER.install();
        let platform = Arc::new(MockPlatform::new(config.cores, page_budget));
        let kernel = Kernel::new(config, Arc::clone(&platform)).unwrap();
        Self { platform, kernel }
    }

    pub fn cores(&self) -> impl Iterator<Item = CoreId> {
        (0..self.kernel.config().cores as u32).map(CoreId)
    }

    /// One interrupt entry plus one monitor run on `core`.
    pub fn step(&self, core: CoreId) -> CoreAction {
        let _on = self.platform.enter_core(core);
        self.kernel.service_interrupts(core);
        self.kernel.monitor(core)
    }

    /// Steps every core until no work is queued anywhere.
    pub fn settle(&self) {
        for _ in 0..SETTLE_ROUNDS {
            for core in self.cores() {
                self.step(core);
            }
            if self.kernel.is_quiescent() && !self.platform.has_pending_interrupts() {
                return;
            }
        }
        panic!("machine did not settle");
    }

    /// Advances the clock by `ticks` and lets every core react.
    pub fn advance(&self, ticks: u64) {
        self.platform.advance(ticks);
        self.settle();
    }

    /// The core `thread` is active on.
    pub fn running_on(&self, thread: &Thread) -> Option<CoreId> {
        self.cores()
            .find(|&core| self.kernel.active_thread(core) == Some(thread.id()))
    }

    /// Rotates the thread's core until `thread` is the active one.
    pub fn make_active(&self, thread: &Thread) -> CoreId {
        for _ in 0..64 {
            self.settle();
            if let Some(core) = self.running_on(thread) {
                return core;
            }
            assert_eq!(thread.state(), ThreadState::OnCpuLists, "{} is not runnable", thread.id());
            let core = thread.last_core().expect("runnable thread has a core");
            let other = self.kernel.active_thread(core).expect("core runs nothing");
            self.kernel.syscall(core, other, Syscall::Yield.encode());
        }
        panic!("{} never became active", thread.id());
    }

    /// Traps `call` from `thread` and returns its result, or `None` if the
    /// thread is still blocked once the machine settled.
    pub fn trap(&self, thread: &Thread, call: Syscall) -> Option<Result<u64, SyscallError>> {
        let core = self.make_active(thread);
        let _ = thread.take_result();
        self.kernel.syscall(core, thread.id(), call.encode());
        self.settle();
        thread.take_result()
    }

    /// Like [`trap`](Self::trap), for a call that must complete.
    pub fn call(&self, thread: &Thread, call: Syscall) -> Result<u64, SyscallError> {
        self.trap(thread, call).expect("call blocked")
    }

    pub fn kernel_op(&self, thread: &Thread, op: KernelOp) -> Option<KernelOpResult> {
        let core = self.make_active(thread);
        let _ = thread.take_kernel_result();
        self.kernel.kernel_op(core, thread.id(), op);
        self.settle();
        thread.take_kernel_result()
    }

    pub fn fault(&self, thread: &Thread, fault: Fault) {
        let core = self.make_active(thread);
        self.kernel.exception(core, thread.id(), fault);
        self.settle();
    }

    /// A user process with one started thread.
    pub fn process_with_thread(&self, name: &str) -> (Ref<Process>, Ref<Thread>) {
        let process = self.kernel.create_process(name);
        let thread = self.kernel.spawn_thread(&process, 0x40_0000, 0).unwrap();
        self.settle();
        (process, thread)
    }

    pub fn assert_consistent(&self) {
        let violations = self.kernel.check_invariants();
        assert!(violations.is_empty(), "{violations:#?}");
    }
}
