use crate::cpu::{Cpu, bump};
use crate::error::SyscallError;
use crate::kernel::Kernel;
use crate::object::{Holder, Ref};
use crate::sched::{Call, KernelOp, RequestKind};
use crate::sync::{Mailbox, MailboxOwner, Mailslot};
use crate::syscall::{RawSyscall, Syscall};
use crate::thread::{Fault, Thread, ThreadEvent, ThreadId};
use crate::xci::Xci;
use kernel_hal::{CoreId, InterruptId, Platform};

/// Something that happened on a core and waits for its monitor.
#[derive(Debug)]
pub(crate) enum Event {
    Syscall { thread: ThreadId, raw: RawSyscall },
    KernelOp { thread: ThreadId, op: KernelOp },
    Exception { thread: ThreadId, fault: Fault },
    /// A message too large to handle in interrupt context.
    Xci(Xci),
    Interrupt(InterruptId),
    /// A scheduler timer is due.
    TimerFire,
}

impl<P: Platform> Kernel<P> {
    /// Handles every queued event. Returns whether there were any.
    pub(super) fn handle_events(&self, core: CoreId) -> bool {
        let mut handled = false;
        for event in self.cpu(core).events.take_all() {
            handled = true;
            log::trace!(target: "kernel::cpu", "{core:?}: {event:?}");
            match event {
                Event::Syscall { thread, raw } => self.trap_syscall(core, thread, raw),
                Event::KernelOp { thread, op } => {
                    if let Some(thread) = self.leave_core(core, thread, ThreadEvent::Trap) {
                        self.enqueue(RequestKind::Syscall {
                            thread,
                            call: Call::Kernel(op),
                        });
                    }
                }
                Event::Exception { thread, fault } => {
                    if let Some(thread) = self.leave_core(core, thread, ThreadEvent::Trap) {
                        self.enqueue(RequestKind::Aborted {
                            thread,
                            crash: Some(fault),
                        });
                    }
                }
                Event::Xci(message) => self.handle_xci_event(core, message),
                Event::Interrupt(line) => {
                    let interrupt = self
                        .irq_table
                        .lock()
                        .get(&line)
                        .and_then(|i| i.upgrade(Holder::Core(core)));
                    match interrupt {
                        Some(interrupt) => self.enqueue(RequestKind::InterruptPulse(
                            interrupt.gate().clone_as(Holder::Scheduler),
                        )),
                        None => {
                            log::debug!(target: "kernel::irq", "line {line} fired with no binding");
                        }
                    }
                }
                Event::TimerFire => self.enqueue(RequestKind::TimerTick),
            }
        }
        handled
    }

    /// The active thread, if it is `thread`.
    fn active(&self, core: CoreId, thread: ThreadId) -> Option<Ref<Thread>> {
        let local = self.cpu(core).local.lock();
        let active = local.active.as_ref().filter(|t| t.id() == thread);
        if active.is_none() {
            log::warn!(
                target: "kernel::cpu",
                "{core:?}: event for {thread}, which is not running here"
            );
        }
        active.map(|t| t.clone_as(Holder::Core(core)))
    }

    /// Takes the active thread off the core with `event`.
    pub(super) fn leave_core(
        &self,
        core: CoreId,
        thread: ThreadId,
        event: ThreadEvent,
    ) -> Option<Ref<Thread>> {
        let cpu = self.cpu(core);
        let thread = {
            let mut local = cpu.local.lock();
            if local.active.as_ref().is_none_or(|t| t.id() != thread) {
                log::warn!(target: "kernel::cpu", "{core:?}: {thread} is not running here");
                return None;
            }
            local.active.take()?
        };
        thread.apply(event);
        cpu.note_left();
        cpu.set_next_tick(None);
        Some(thread.clone_as(Holder::Scheduler))
    }

    fn trap_syscall(&self, core: CoreId, tid: ThreadId, raw: RawSyscall) {
        let Some(thread) = self.active(core, tid) else {
            return;
        };
        let call = match Syscall::decode(raw) {
            Ok(call) => call,
            Err(e) => {
                log::debug!(target: "kernel::syscall", "{tid}: rejected {raw:?}: {e}");
                thread.set_result(Err(e));
                return;
            }
        };
        if call.is_fast_path() {
            self.fast_path(core, &thread, call);
            return;
        }
        drop(thread);
        if let Some(thread) = self.leave_core(core, tid, ThreadEvent::Trap) {
            self.enqueue(RequestKind::Syscall {
                thread,
                call: Call::User(call),
            });
        }
    }

    /// Calls that complete on the calling core without the scheduler.
    fn fast_path(&self, core: CoreId, thread: &Ref<Thread>, call: Syscall) {
        let cpu = self.cpu(core);
        let result = match call {
            Syscall::Yield => {
                thread.set_result(Ok(0));
                let mut local = cpu.local.lock();
                if let Some(active) = local.active.take() {
                    active.apply(ThreadEvent::Preempt);
                    local.ran.push_back(active);
                }
                drop(local);
                cpu.set_next_tick(None);
                return;
            }
            Syscall::ReadTick => Ok(self.platform.read_tick()),
            Syscall::CurrentCore => Ok(u64::from(core.0)),
            Syscall::MailboxSend { token, message } => thread
                .process()
                .lookup::<Mailslot>(token, Holder::Core(core))
                .and_then(|slot| self.send_on_core(slot.mailbox(), message)),
            Syscall::MailboxReceive { token } => thread
                .process()
                .lookup::<MailboxOwner>(token, Holder::Core(core))
                .and_then(|owner| self.receive_on_core(cpu, owner.mailbox())),
            other => fatal!("{other:?} is not a fast-path call"),
        };
        thread.set_result(result);
    }

    fn send_on_core(&self, mailbox: &Mailbox, message: u64) -> Result<u64, SyscallError> {
        if mailbox.send(message)? {
            self.enqueue(RequestKind::GateWake(mailbox.gate().clone_as(Holder::Scheduler)));
        }
        Ok(0)
    }

    fn receive_on_core(&self, cpu: &Cpu, mailbox: &Mailbox) -> Result<u64, SyscallError> {
        let races = mailbox.stats().false_closes;
        let (message, wake) = mailbox.receive()?;
        if mailbox.stats().false_closes != races {
            bump(&cpu.stats.mailbox_races);
        }
        if wake {
            self.enqueue(RequestKind::GateWake(mailbox.gate().clone_as(Holder::Scheduler)));
        }
        Ok(message)
    }

    fn handle_xci_event(&self, core: CoreId, message: Xci) {
        match message {
            Xci::TlbInvalidate(request) => self.service_shootdown(core, &request),
            Xci::StopProcess(pid) => {
                // Threads of a stopping process carry the abort flag; the
                // selection step reaps them.
                log::debug!(target: "kernel::cpu", "{core:?}: stop of {pid} observed");
            }
            Xci::Wake => {}
            Xci::Panic => self.cpu(core).halt(),
        }
    }
}
