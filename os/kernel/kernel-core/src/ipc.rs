//! Interface publishing and IPC endpoints.
//!
//! A provider publishes a named [`InterfaceInstance`]. Clients subscribe to
//! names ([`InterfaceSubscription`], whose notify fires when a matching
//! instance appears), take snapshots ([`InterfaceEnum`]) and connect, which
//! creates an [`IpcEndpoint`] queued on the instance until the provider
//! accepts or rejects it. Every endpoint state change opens the endpoint's
//! gate.

mod endpoint;
mod interface;

pub use endpoint::{EndpointState, IpcEndpoint};
pub use interface::{InterfaceEnum, InterfaceInstance, InterfaceSubscription};

use crate::object::{Holder, ObjectId, Ref, WeakRef};
use alloc::string::String;
use alloc::vec::Vec;

/// Published instances and live subscriptions, guarded by one short lock.
#[derive(Debug, Default)]
pub(crate) struct InterfaceRegistry {
    instances: Vec<WeakRef<InterfaceInstance>>,
    subscriptions: Vec<WeakRef<InterfaceSubscription>>,
}

impl InterfaceRegistry {
    pub(crate) fn publish(&mut self, instance: &Ref<InterfaceInstance>) {
        self.instances.retain(WeakRef::is_alive);
        self.instances.push(instance.downgrade());
    }

    pub(crate) fn subscribe(&mut self, subscription: &Ref<InterfaceSubscription>) {
        self.subscriptions.retain(WeakRef::is_alive);
        self.subscriptions.push(subscription.downgrade());
    }

    /// Live instance published under `name`; the newest wins.
    pub(crate) fn find(&self, name: &str, holder: Holder) -> Option<Ref<InterfaceInstance>> {
        self.instances
            .iter()
            .rev()
            .filter_map(|i| i.upgrade(holder))
            .find(|i| i.name() == name)
    }

    pub(crate) fn subscribers(
        &self,
        name: &str,
        holder: Holder,
    ) -> Vec<Ref<InterfaceSubscription>> {
        self.subscriptions
            .iter()
            .filter_map(|s| s.upgrade(holder))
            .filter(|s| s.name() == name)
            .collect()
    }

    /// Sorted, de-duplicated names of live instances.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .instances
            .iter()
            .filter_map(|i| i.upgrade(Holder::Kernel("enumerate")))
            .map(|i| String::from(i.name()))
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    pub(crate) fn forget(&mut self, id: ObjectId) {
        self.instances.retain(|i| i.id() != id && i.is_alive());
        self.subscriptions.retain(|s| s.id() != id && s.is_alive());
    }

    pub(crate) fn instance_count(&self) -> usize {
        self.instances.iter().filter(|i| i.is_alive()).count()
    }
}
