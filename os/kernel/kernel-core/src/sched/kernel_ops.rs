use crate::error::SyscallError;
use crate::ipc::{
    EndpointState, InterfaceEnum, InterfaceInstance, InterfaceSubscription, IpcEndpoint,
};
use crate::object::{Holder, Ref};
use crate::sched::{Dispatcher, Disposition, KernelOp};
use crate::sync::WaitTarget;
use crate::thread::Thread;
use alloc::vec::Vec;
use kernel_hal::Platform;

impl<P: Platform> Dispatcher<'_, P> {
    pub(super) fn dispatch_kernel_op(&mut self, thread: &Ref<Thread>, op: KernelOp) -> Disposition {
        log::trace!(target: "kernel::sched", "{}: {op:?}", thread.id());
        match op {
            KernelOp::Wait {
                targets,
                mode,
                timeout,
            } => {
                let holder = Holder::Wait(thread.id());
                let targets: Result<Vec<WaitTarget>, SyscallError> = targets
                    .iter()
                    .map(|object| WaitTarget::resolve(object, holder))
                    .collect();
                match targets {
                    Ok(targets) => self.start_wait(thread, targets, mode, timeout),
                    Err(e) => Disposition::Resume(Err(e)),
                }
            }
            KernelOp::Signal(object) => {
                Disposition::Resume(self.signal_object(&object).map(|()| 0))
            }
            KernelOp::SetAffinity(mask) => Disposition::Resume(self.set_affinity(thread, mask)),
            KernelOp::MailboxSend { slot, message } => {
                Disposition::Resume(self.mailbox_send(slot.mailbox(), message))
            }
            KernelOp::MailboxReceive(owner) => {
                Disposition::Resume(self.mailbox_receive(owner.mailbox()))
            }
            KernelOp::InterfacePublish { name } => self.publish(thread, &name),
            KernelOp::InterfaceSubscribe { name } => self.subscribe(&name),
            KernelOp::InterfaceEnumerate => {
                let names = self.kernel.interfaces.lock().names();
                let snapshot = InterfaceEnum::create(&self.kernel.arena, Holder::Scheduler, names);
                Disposition::ResumeObject(snapshot.into_object())
            }
            KernelOp::IpcConnect { name } => self.connect(thread, &name),
            KernelOp::IpcAccept(instance) => self.accept(thread, &instance),
            KernelOp::IpcReject(instance) => {
                Disposition::Resume(self.reject(thread, &instance).map(|()| 0))
            }
            KernelOp::IpcDisconnect(endpoint) => {
                if endpoint.transition(EndpointState::Disconnected) {
                    self.fan_out(&**endpoint.gate());
                }
                Disposition::Resume(Ok(0))
            }
            KernelOp::Exit { code } => {
                self.exit_thread(thread.clone_as(Holder::Scheduler), code, None);
                Disposition::Gone
            }
        }
    }

    fn publish(&mut self, thread: &Thread, name: &str) -> Disposition {
        if name.is_empty() {
            return Disposition::Resume(Err(SyscallError::InvalidArgument));
        }
        let provider = thread.process().id();
        let instance =
            InterfaceInstance::create(&self.kernel.arena, Holder::Scheduler, name, provider);
        let subscribers = {
            let mut registry = self.kernel.interfaces.lock();
            registry.publish(&instance);
            registry.subscribers(name, Holder::Scheduler)
        };
        log::debug!(
            target: "kernel::ipc",
            "{provider} published {name:?}; {} subscribers",
            subscribers.len()
        );
        for subscription in subscribers {
            subscription.notify().raise();
            self.fan_out(&**subscription.notify());
        }
        Disposition::ResumeObject(instance.into_object())
    }

    fn subscribe(&mut self, name: &str) -> Disposition {
        let subscription =
            InterfaceSubscription::create(&self.kernel.arena, Holder::Scheduler, name);
        let published = {
            let mut registry = self.kernel.interfaces.lock();
            registry.subscribe(&subscription);
            registry.find(name, Holder::Scheduler).is_some()
        };
        if published {
            subscription.notify().raise();
        }
        Disposition::ResumeObject(subscription.into_object())
    }

    fn connect(&mut self, thread: &Thread, name: &str) -> Disposition {
        let Some(instance) = self.kernel.interfaces.lock().find(name, Holder::Scheduler) else {
            return Disposition::Resume(Err(SyscallError::InvalidArgument));
        };
        let client = thread.process();
        let endpoint =
            IpcEndpoint::create(&self.kernel.arena, Holder::Scheduler, &instance, client.id());
        instance.queue(endpoint.clone_as(Holder::Object(instance.object_id())));
        client.add_endpoint(&endpoint);
        log::debug!(target: "kernel::ipc", "{} connecting to {name:?}", client.id());

        instance.notify().raise();
        self.fan_out(&**instance.notify());
        Disposition::ResumeObject(endpoint.into_object())
    }

    fn accept(&mut self, thread: &Thread, instance: &Ref<InterfaceInstance>) -> Disposition {
        let provider = thread.process();
        if instance.provider() != provider.id() {
            return Disposition::Resume(Err(SyscallError::InvalidArgument));
        }
        let Some(endpoint) = instance.next_pending() else {
            return Disposition::Resume(Err(SyscallError::WouldBlock));
        };
        if endpoint.transition(EndpointState::Accepted) {
            self.fan_out(&**endpoint.gate());
        }
        provider.add_endpoint(&endpoint);
        Disposition::ResumeObject(endpoint.clone_as(Holder::Scheduler).into_object())
    }

    fn reject(
        &mut self,
        thread: &Thread,
        instance: &InterfaceInstance,
    ) -> Result<(), SyscallError> {
        if instance.provider() != thread.process().id() {
            return Err(SyscallError::InvalidArgument);
        }
        let endpoint = instance.next_pending().ok_or(SyscallError::WouldBlock)?;
        if endpoint.transition(EndpointState::Rejected) {
            self.fan_out(&**endpoint.gate());
        }
        Ok(())
    }
}
