//! Threads and their state machine.

mod state;

pub use state::{ThreadEvent, ThreadState};

use crate::error::SyscallError;
use crate::memory::VirtualMap;
use crate::object::{Arena, Holder, ObjectId, ObjectRef, Ref};
use crate::process::Process;
use crate::sched::KernelOpResult;
use crate::sync::{Gate, GateMode};
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_hal::{CoreId, CoreMask, VirtualAddress};
use kernel_sync::SpinLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// Synchronous exception raised by a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    PageFault { address: VirtualAddress },
    InvalidOpcode,
    GeneralProtection,
    DivideByZero,
}

impl Fault {
    /// Exit code reported for a process torn down by this fault.
    #[must_use]
    pub const fn exit_code(self) -> i64 {
        match self {
            Self::PageFault { .. } => -14,
            Self::InvalidOpcode => -6,
            Self::GeneralProtection => -13,
            Self::DivideByZero => -8,
        }
    }
}

pub(crate) struct ThreadInner {
    state: ThreadState,
    quantum: u32,
    affinity: CoreMask,
    last_core: Option<CoreId>,
    result: Option<Result<u64, SyscallError>>,
    object: Option<ObjectRef>,
    exit_code: Option<i64>,
    fault: Option<Fault>,
}

pub struct Thread {
    id: ThreadId,
    object: ObjectId,
    process: Ref<Process>,
    kernel: bool,
    entry: u64,
    arg: u64,
    inner: SpinLock<ThreadInner>,
    abort: AtomicBool,
    exit_gate: Ref<Gate>,
    stack: SpinLock<Option<Ref<VirtualMap>>>,
    tls: SpinLock<Option<Ref<VirtualMap>>>,
}

/// What a new thread starts with.
pub(crate) struct ThreadSpec {
    pub id: ThreadId,
    pub process: Ref<Process>,
    pub entry: u64,
    pub arg: u64,
    pub affinity: CoreMask,
}

impl Thread {
    pub(crate) fn create(arena: &Arc<Arena>, holder: Holder, spec: ThreadSpec) -> Ref<Self> {
        let kernel = spec.process.is_kernel();
        Ref::create_with(arena, holder, false, |object| Self {
            id: spec.id,
            object,
            process: spec.process,
            kernel,
            entry: spec.entry,
            arg: spec.arg,
            inner: SpinLock::new(ThreadInner {
                state: ThreadState::Init,
                quantum: 0,
                affinity: spec.affinity,
                last_core: None,
                result: None,
                object: None,
                exit_code: None,
                fault: None,
            }),
            abort: AtomicBool::new(false),
            exit_gate: Gate::create(arena, Holder::Object(object), GateMode::Latch, false),
            stack: SpinLock::new(None),
            tls: SpinLock::new(None),
        })
    }

    #[must_use]
    pub const fn id(&self) -> ThreadId {
        self.id
    }

    #[must_use]
    pub const fn object_id(&self) -> ObjectId {
        self.object
    }

    #[must_use]
    pub const fn process(&self) -> &Ref<Process> {
        &self.process
    }

    /// Runs in kernel mode on behalf of the kernel process.
    #[must_use]
    pub const fn is_kernel(&self) -> bool {
        self.kernel
    }

    #[must_use]
    pub const fn entry(&self) -> (u64, u64) {
        (self.entry, self.arg)
    }

    #[must_use]
    pub fn state(&self) -> ThreadState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn quantum(&self) -> u32 {
        self.inner.lock().quantum
    }

    #[must_use]
    pub fn affinity(&self) -> CoreMask {
        self.inner.lock().affinity
    }

    #[must_use]
    pub fn last_core(&self) -> Option<CoreId> {
        self.inner.lock().last_core
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i64> {
        self.inner.lock().exit_code
    }

    /// Fault that sent the thread to `DebugCrashed` or tore it down.
    #[must_use]
    pub fn fault(&self) -> Option<Fault> {
        self.inner.lock().fault
    }

    /// Result delivered with the last resume, as placed in the result register.
    #[must_use]
    pub fn last_result(&self) -> Option<Result<u64, SyscallError>> {
        self.inner.lock().result
    }

    /// Takes the result of the last resume, leaving none behind.
    pub fn take_result(&self) -> Option<Result<u64, SyscallError>> {
        let mut inner = self.inner.lock();
        inner.object = None;
        inner.result.take()
    }

    /// Takes the outcome of the last kernel operation.
    #[must_use]
    pub fn take_kernel_result(&self) -> Option<KernelOpResult> {
        let mut inner = self.inner.lock();
        if let Some(object) = inner.object.take() {
            inner.result = None;
            return Some(KernelOpResult::Object(object));
        }
        inner.result.take().map(|r| match r {
            Ok(v) => KernelOpResult::Value(v),
            Err(e) => KernelOpResult::Error(e),
        })
    }

    #[must_use]
    pub const fn exit_gate(&self) -> &Ref<Gate> {
        &self.exit_gate
    }

    #[must_use]
    pub fn is_abort_requested(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }

    pub(crate) fn request_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    /// Applies a state machine event; a missing transition is fatal.
    pub(crate) fn apply(&self, event: ThreadEvent) -> ThreadState {
        let mut inner = self.inner.lock();
        match inner.state.on(event) {
            Ok(next) => {
                log::trace!(
                    target: "kernel::thread",
                    "{}: {:?} --{event:?}--> {next:?}",
                    self.id,
                    inner.state,
                );
                inner.state = next;
                next
            }
            Err(e) => {
                drop(inner);
                fatal!("{}: {e}", self.id)
            }
        }
    }

    pub(crate) fn set_quantum(&self, quantum: u32) {
        self.inner.lock().quantum = quantum;
    }

    /// Consumes `ticks` of the quantum; returns what is left.
    pub(crate) fn tick(&self, ticks: u32) -> u32 {
        let mut inner = self.inner.lock();
        inner.quantum = inner.quantum.saturating_sub(ticks);
        inner.quantum
    }

    pub(crate) fn set_affinity(&self, mask: CoreMask) {
        self.inner.lock().affinity = mask;
    }

    pub(crate) fn set_last_core(&self, core: CoreId) {
        self.inner.lock().last_core = Some(core);
    }

    pub(crate) fn set_result(&self, result: Result<u64, SyscallError>) {
        let mut inner = self.inner.lock();
        inner.result = Some(result);
        inner.object = None;
    }

    pub(crate) fn set_object_result(&self, object: ObjectRef) {
        let mut inner = self.inner.lock();
        inner.result = Some(Ok(object.id().0));
        inner.object = Some(object);
    }

    pub(crate) fn set_exit(&self, code: i64, fault: Option<Fault>) {
        let mut inner = self.inner.lock();
        inner.exit_code = Some(code);
        if fault.is_some() {
            inner.fault = fault;
        }
    }

    pub(crate) fn set_fault(&self, fault: Fault) {
        self.inner.lock().fault = Some(fault);
    }

    pub(crate) fn attach_stack(&self, stack: Ref<VirtualMap>, tls: Option<Ref<VirtualMap>>) {
        *self.stack.lock() = Some(stack);
        *self.tls.lock() = tls;
    }

    /// Base of the stack mapping, if one is attached.
    #[must_use]
    pub fn stack_base(&self) -> Option<VirtualAddress> {
        self.stack.lock().as_ref().map(|s| s.base())
    }

    /// Releases stack and TLS; their cleanup starts the TLB shootdown.
    pub(crate) fn release_memory(&self) {
        let stack = self.stack.lock().take();
        let tls = self.tls.lock().take();
        drop(stack);
        drop(tls);
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("process", &self.process.id())
            .field("state", &inner.state)
            .field("quantum", &inner.quantum)
            .field("affinity", &inner.affinity)
            .finish_non_exhaustive()
    }
}
