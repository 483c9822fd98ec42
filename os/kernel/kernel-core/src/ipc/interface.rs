use crate::ipc::IpcEndpoint;
use crate::object::{Arena, Holder, Ref};
use crate::process::ProcessId;
use crate::sync::Notify;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_sync::SpinLock;

/// A published, named service offered by one process.
#[derive(Debug)]
pub struct InterfaceInstance {
    name: String,
    provider: ProcessId,
    pending: SpinLock<VecDeque<Ref<IpcEndpoint>>>,
    notify: Ref<Notify>,
}

impl InterfaceInstance {
    pub(crate) fn create(
        arena: &Arc<Arena>,
        holder: Holder,
        name: &str,
        provider: ProcessId,
    ) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |id| Self {
            name: String::from(name),
            provider,
            pending: SpinLock::new(VecDeque::new()),
            notify: Notify::create(arena, Holder::Object(id)),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn provider(&self) -> ProcessId {
        self.provider
    }

    /// Signalled whenever a connection is queued.
    #[must_use]
    pub const fn notify(&self) -> &Ref<Notify> {
        &self.notify
    }

    #[must_use]
    pub fn pending_connections(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn queue(&self, endpoint: Ref<IpcEndpoint>) {
        self.pending.lock().push_back(endpoint);
    }

    pub(crate) fn next_pending(&self) -> Option<Ref<IpcEndpoint>> {
        self.pending.lock().pop_front()
    }

    pub(crate) fn drain_pending(&self) -> Vec<Ref<IpcEndpoint>> {
        self.pending.lock().drain(..).collect()
    }
}

/// Snapshot of published interface names.
#[derive(Debug)]
pub struct InterfaceEnum {
    names: Vec<String>,
}

impl InterfaceEnum {
    pub(crate) fn create(arena: &Arc<Arena>, holder: Holder, names: Vec<String>) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |_| Self { names })
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// Interest in instances published under one name.
#[derive(Debug)]
pub struct InterfaceSubscription {
    name: String,
    notify: Ref<Notify>,
}

impl InterfaceSubscription {
    pub(crate) fn create(arena: &Arc<Arena>, holder: Holder, name: &str) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |id| Self {
            name: String::from(name),
            notify: Notify::create(arena, Holder::Object(id)),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn notify(&self) -> &Ref<Notify> {
        &self.notify
    }
}
