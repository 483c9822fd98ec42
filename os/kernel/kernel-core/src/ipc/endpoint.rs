use crate::ipc::InterfaceInstance;
use crate::object::{Arena, Holder, Ref, WeakRef};
use crate::process::ProcessId;
use crate::sync::{Gate, GateMode};
use alloc::string::String;
use alloc::sync::Arc;
use kernel_sync::SpinLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    Pending,
    Accepted,
    Rejected,
    Disconnected,
}

/// One client connection to an interface instance.
#[derive(Debug)]
pub struct IpcEndpoint {
    interface: WeakRef<InterfaceInstance>,
    name: String,
    client: ProcessId,
    state: SpinLock<EndpointState>,
    gate: Ref<Gate>,
}

impl IpcEndpoint {
    pub(crate) fn create(
        arena: &Arc<Arena>,
        holder: Holder,
        interface: &Ref<InterfaceInstance>,
        client: ProcessId,
    ) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |id| Self {
            interface: interface.downgrade(),
            name: String::from(interface.name()),
            client,
            state: SpinLock::new(EndpointState::Pending),
            gate: Gate::create(arena, Holder::Object(id), GateMode::Latch, false),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn client(&self) -> ProcessId {
        self.client
    }

    #[must_use]
    pub fn interface(&self, holder: Holder) -> Option<Ref<InterfaceInstance>> {
        self.interface.upgrade(holder)
    }

    #[must_use]
    pub fn state(&self) -> EndpointState {
        *self.state.lock()
    }

    /// Opens whenever the state leaves `Pending`.
    #[must_use]
    pub const fn gate(&self) -> &Ref<Gate> {
        &self.gate
    }

    /// Moves to `next` unless already disconnected. Returns whether the gate
    /// has waiters to wake.
    pub(crate) fn transition(&self, next: EndpointState) -> bool {
        {
            let mut state = self.state.lock();
            if *state == EndpointState::Disconnected {
                return false;
            }
            *state = next;
        }
        self.gate.open_fast()
    }
}
