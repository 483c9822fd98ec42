//! Processes: thread membership, stop state machine and token tables.

mod token;

use crate::error::{KernelError, SyscallError};
use crate::ipc::IpcEndpoint;
use crate::memory::VaAllocator;
use crate::object::{Arena, Holder, KernelObject, ObjectRef, Ref, WeakRef};
use crate::sync::{Gate, GateMode};
use crate::thread::Thread;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use kernel_hal::{AddressSpaceId, VirtualAddress};
use kernel_sync::SpinLock;
use token::TokenTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// `Running → Stopping → Stopped`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessLifecycle {
    Running,
    /// Threads are being aborted; no new threads or tokens.
    Stopping,
    /// Every thread exited and the stop DPC released the token table.
    Stopped,
}

#[derive(Debug)]
pub(crate) struct ProcessState {
    pub lifecycle: ProcessLifecycle,
    pub threads: Vec<WeakRef<Thread>>,
    pub live_threads: usize,
    pub exit_code: Option<i64>,
    pub debugger_attached: bool,
    pub stop_queued: bool,
}

pub struct Process {
    id: ProcessId,
    name: String,
    space: AddressSpaceId,
    kernel: bool,
    state: SpinLock<ProcessState>,
    tokens: SpinLock<TokenTable>,
    endpoints: SpinLock<Vec<WeakRef<IpcEndpoint>>>,
    exit_gate: Ref<Gate>,
    va: SpinLock<VaAllocator>,
}

pub(crate) struct ProcessSpec<'a> {
    pub id: ProcessId,
    pub name: &'a str,
    pub space: AddressSpaceId,
    pub va: VaAllocator,
}

impl Process {
    pub(crate) fn create(arena: &Arc<Arena>, holder: Holder, spec: ProcessSpec<'_>) -> Ref<Self> {
        let kernel = spec.space.is_kernel();
        Ref::create_with(arena, holder, kernel, |object| Self {
            id: spec.id,
            name: String::from(spec.name),
            space: spec.space,
            kernel,
            state: SpinLock::new(ProcessState {
                lifecycle: ProcessLifecycle::Running,
                threads: Vec::new(),
                live_threads: 0,
                exit_code: None,
                debugger_attached: false,
                stop_queued: false,
            }),
            tokens: SpinLock::new(TokenTable::new()),
            endpoints: SpinLock::new(Vec::new()),
            exit_gate: Gate::create(arena, Holder::Object(object), GateMode::Latch, false),
            va: SpinLock::new(spec.va),
        })
    }

    #[must_use]
    pub const fn id(&self) -> ProcessId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn space(&self) -> AddressSpaceId {
        self.space
    }

    /// The permanent process owning kernel threads.
    #[must_use]
    pub const fn is_kernel(&self) -> bool {
        self.kernel
    }

    #[must_use]
    pub fn lifecycle(&self) -> ProcessLifecycle {
        self.state.lock().lifecycle
    }

    #[must_use]
    pub fn exit_code(&self) -> Option<i64> {
        self.state.lock().exit_code
    }

    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.state.lock().live_threads
    }

    #[must_use]
    pub fn debugger_attached(&self) -> bool {
        self.state.lock().debugger_attached
    }

    /// Opens once the process is `Stopped`.
    #[must_use]
    pub const fn exit_gate(&self) -> &Ref<Gate> {
        &self.exit_gate
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ProcessState) -> R) -> R {
        self.state.with_lock(f)
    }

    /// Live threads of the process.
    pub(crate) fn threads(&self, holder: Holder) -> Vec<Ref<Thread>> {
        let state = self.state.lock();
        state
            .threads
            .iter()
            .filter_map(|t| t.upgrade(holder))
            .collect()
    }

    /// Registers a new thread unless the process is stopping.
    pub(crate) fn add_thread(&self, thread: &Ref<Thread>) -> Result<(), KernelError> {
        let mut state = self.state.lock();
        if state.lifecycle != ProcessLifecycle::Running {
            return Err(KernelError::ProcessStopping);
        }
        state.threads.retain(WeakRef::is_alive);
        state.threads.push(thread.downgrade());
        state.live_threads += 1;
        Ok(())
    }

    /// Places `object` in the token table.
    ///
    /// # Errors
    /// [`KernelError::ProcessStopping`] once the stop has begun; the table is
    /// drained exactly once and must not refill.
    pub fn insert_token(&self, object: &ObjectRef) -> Result<u32, KernelError> {
        let state = self.state.lock();
        if state.lifecycle != ProcessLifecycle::Running {
            return Err(KernelError::ProcessStopping);
        }
        let token = self.tokens.lock().insert(object);
        drop(state);
        Ok(token)
    }

    #[must_use]
    pub fn token(&self, token: u32, holder: Holder) -> Option<ObjectRef> {
        self.tokens.lock().get(token, holder)
    }

    /// Removes a token; the returned reference is released when dropped.
    #[must_use]
    pub fn close_token(&self, token: u32) -> Option<ObjectRef> {
        self.tokens.lock().remove(token)
    }

    /// Resolves a token to an object of kind `T`.
    ///
    /// # Errors
    /// [`SyscallError::InvalidToken`] for an unknown token,
    /// [`SyscallError::WrongObjectType`] for another kind.
    pub fn lookup<T: KernelObject>(
        &self,
        token: u32,
        holder: Holder,
    ) -> Result<Ref<T>, SyscallError> {
        self.token(token, holder)
            .ok_or(SyscallError::InvalidToken)?
            .downcast::<T>()
            .map_err(|_| SyscallError::WrongObjectType)
    }

    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tokens.lock().len()
    }

    pub(crate) fn token_objects(&self, holder: Holder) -> Vec<ObjectRef> {
        self.tokens.lock().objects(holder)
    }

    pub(crate) fn drain_tokens(&self) -> Vec<ObjectRef> {
        let _state = self.state.lock();
        self.tokens.lock().drain()
    }

    pub(crate) fn add_endpoint(&self, endpoint: &Ref<IpcEndpoint>) {
        let mut endpoints = self.endpoints.lock();
        endpoints.retain(WeakRef::is_alive);
        endpoints.push(endpoint.downgrade());
    }

    pub(crate) fn take_endpoints(&self) -> Vec<WeakRef<IpcEndpoint>> {
        core::mem::take(&mut *self.endpoints.lock())
    }

    pub(crate) fn allocate_va(&self, pages: usize) -> Result<VirtualAddress, KernelError> {
        self.va.lock().allocate(pages)
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("space", &self.space)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}
