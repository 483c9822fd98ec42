//! Kind-specific cleanup, run from a high-priority DPC on the core where
//! the last reference dropped.

use crate::ipc::EndpointState;
use crate::kernel::Kernel;
use crate::object::{Holder, Reclaim};
use crate::sched::RequestKind;
use kernel_hal::{CoreId, Platform};

impl<P: Platform> Kernel<P> {
    pub(crate) fn run_cleanup(&self, core: CoreId, object: Reclaim) {
        let id = object.header().id();
        log::debug!(target: "kernel::object", "{core:?}: reclaiming {}#{id}", object.kind());
        match &object {
            Reclaim::Process(cell) => {
                let leftover = cell.body().drain_tokens();
                if !leftover.is_empty() {
                    log::warn!(
                        target: "kernel::object",
                        "process#{id} reclaimed with {} tokens",
                        leftover.len(),
                    );
                }
            }
            Reclaim::Thread(cell) => {
                let thread = cell.body();
                {
                    let mut threads = self.threads.lock();
                    if threads.get(&thread.id()).is_some_and(|w| w.id() == id) {
                        threads.remove(&thread.id());
                    }
                }
                self.release_thread_slot();
                thread.release_memory();
            }
            Reclaim::PageArray(cell) => self.platform.free_pages(cell.body().range()),
            Reclaim::VirtualMap(cell) => self.tear_down_mapping(core, cell.body()),
            Reclaim::Alarm(cell) => {
                if let Some(key) = cell.body().with_timer(|t| t.key.take()) {
                    self.enqueue(RequestKind::AlarmCancel(key));
                }
            }
            Reclaim::SemaphoreUser(cell) => {
                let user = cell.body();
                let count = user.take_held();
                if count > 0 {
                    log::debug!(target: "kernel::object", "semaphore user#{id} returns {count}");
                    self.enqueue(RequestKind::SemaphoreReturn {
                        semaphore: user.semaphore().clone_as(Holder::Scheduler),
                        count,
                    });
                }
            }
            Reclaim::Interrupt(cell) => {
                let line = cell.body().line();
                let unbound = {
                    let mut table = self.irq_table.lock();
                    let ours = table.get(&line).is_some_and(|w| w.id() == id);
                    if ours {
                        table.remove(&line);
                    }
                    ours
                };
                if unbound {
                    self.platform.set_enable(line, false);
                }
            }
            Reclaim::MailboxOwner(cell) => {
                let mailbox = cell.body().mailbox();
                if mailbox.orphan() {
                    self.enqueue(RequestKind::GateWake(mailbox.gate().clone_as(Holder::Scheduler)));
                }
            }
            Reclaim::InterfaceInstance(cell) => {
                self.interfaces.lock().forget(id);
                for endpoint in cell.body().drain_pending() {
                    if endpoint.transition(EndpointState::Rejected) {
                        let gate = endpoint.gate().clone_as(Holder::Scheduler);
                        self.enqueue(RequestKind::GateWake(gate));
                    }
                }
            }
            Reclaim::InterfaceSubscription(_) => self.interfaces.lock().forget(id),
            Reclaim::IpcEndpoint(cell) => {
                let endpoint = cell.body();
                if endpoint.transition(EndpointState::Disconnected) {
                    let gate = endpoint.gate().clone_as(Holder::Scheduler);
                    self.enqueue(RequestKind::GateWake(gate));
                }
            }
            Reclaim::External(cell) => cell.body().destroy(id),
            Reclaim::Notify(_)
            | Reclaim::Gate(_)
            | Reclaim::Semaphore(_)
            | Reclaim::Mailbox(_)
            | Reclaim::Mailslot(_)
            | Reclaim::InterfaceEnum(_)
            | Reclaim::NotifyProxy(_) => {}
        }
        self.arena.note_reclaimed();
    }
}
