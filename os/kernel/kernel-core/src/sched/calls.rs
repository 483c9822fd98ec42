use crate::error::SyscallError;
use crate::object::{External, Holder, IoSubmit, ObjectRef, Ref};
use crate::process::Process;
use crate::sched::{Dispatcher, Disposition, ParkReason, TimerAction};
use crate::sync::{
    Alarm, Gate, GateMode, Interrupt, Mailbox, MailboxOwner, Mailslot, Notify, NotifyProxy,
    Semaphore, SemaphoreUser, WaitTarget,
};
use crate::syscall::Syscall;
use crate::thread::{Thread, ThreadEvent};
use alloc::vec::Vec;
use kernel_hal::{CoreMask, InterruptId, Platform, TIMER_VECTOR, XCI_VECTOR};

type CallResult = Result<u64, SyscallError>;

impl<P: Platform> Dispatcher<'_, P> {
    pub(super) fn dispatch_syscall(&mut self, thread: &Ref<Thread>, call: Syscall) -> Disposition {
        log::trace!(target: "kernel::syscall", "{}: {call:?}", thread.id());
        let process = thread.process();
        let result = match call {
            Syscall::ExitThread { code } => {
                self.exit_thread(thread.clone_as(Holder::Scheduler), code, None);
                return Disposition::Gone;
            }
            Syscall::ExitProcess { code } => {
                if !process.is_kernel() {
                    self.begin_process_stop(process, code);
                }
                self.exit_thread(thread.clone_as(Holder::Scheduler), code, None);
                return Disposition::Gone;
            }
            Syscall::Yield => Ok(0),
            Syscall::ReadTick => Ok(self.kernel.platform.read_tick()),
            Syscall::CurrentCore => Ok(thread.last_core().map_or(0, |c| u64::from(c.0))),
            Syscall::Sleep { ticks } => return self.sleep(thread, ticks),
            Syscall::Wait { tokens, mode, timeout } => {
                let targets: Result<Vec<WaitTarget>, SyscallError> = tokens
                    .as_slice()
                    .iter()
                    .map(|&token| {
                        let object = process
                            .token(token, Holder::Wait(thread.id()))
                            .ok_or(SyscallError::InvalidToken)?;
                        WaitTarget::resolve(&object, Holder::Wait(thread.id()))
                    })
                    .collect();
                return match targets {
                    Ok(targets) => self.start_wait(thread, targets, mode, timeout),
                    Err(e) => Disposition::Resume(Err(e)),
                };
            }
            Syscall::SetAffinity { mask } => self.set_affinity(thread, mask),
            Syscall::CreateThread { entry, arg } => self.create_thread(thread, entry, arg),
            Syscall::CreateGate { latch, open } => {
                let mode = if latch { GateMode::Latch } else { GateMode::AutoReset };
                let gate = Gate::create(&self.kernel.arena, Holder::Scheduler, mode, open);
                token_for(process, gate.into_object())
            }
            Syscall::CreateNotify => {
                let notify = Notify::create(&self.kernel.arena, Holder::Scheduler);
                token_for(process, notify.into_object())
            }
            Syscall::CreateSemaphore { initial, max } => {
                self.create_semaphore(process, initial, max)
            }
            Syscall::CreateMailbox { capacity } => self.create_mailbox(process, capacity),
            Syscall::CreateAlarm => {
                let alarm = Alarm::create(&self.kernel.arena, Holder::Scheduler);
                token_for(process, alarm.into_object())
            }
            Syscall::GateSet { token } => process
                .lookup::<Gate>(token, Holder::Scheduler)
                .map(|gate| {
                    gate.open_fast();
                    self.fan_out(&*gate);
                    0
                }),
            Syscall::GateReset { token } => process
                .lookup::<Gate>(token, Holder::Scheduler)
                .map(|gate| {
                    gate.close();
                    0
                }),
            Syscall::GatePulse { token } => process
                .lookup::<Gate>(token, Holder::Scheduler)
                .map(|gate| {
                    gate.open_fast();
                    self.fan_out(&*gate);
                    gate.close();
                    0
                }),
            Syscall::NotifySignal { token } => process
                .token(token, Holder::Scheduler)
                .ok_or(SyscallError::InvalidToken)
                .and_then(|object| self.signal_notify(&object))
                .map(|()| 0),
            Syscall::SemaphoreRelease { token, count } => {
                self.release_semaphore(process, token, count)
            }
            Syscall::MailboxSend { token, message } => process
                .lookup::<Mailslot>(token, Holder::Scheduler)
                .and_then(|slot| self.mailbox_send(slot.mailbox(), message)),
            Syscall::MailboxReceive { token } => process
                .lookup::<MailboxOwner>(token, Holder::Scheduler)
                .and_then(|owner| self.mailbox_receive(owner.mailbox())),
            Syscall::AlarmArm { token, delay, period } => process
                .lookup::<Alarm>(token, Holder::Scheduler)
                .map(|alarm| self.arm_alarm(&alarm, delay, period)),
            Syscall::AlarmCancel { token } => process
                .lookup::<Alarm>(token, Holder::Scheduler)
                .map(|alarm| self.cancel_alarm(&alarm)),
            Syscall::CloseToken { token } => process
                .close_token(token)
                .ok_or(SyscallError::InvalidToken)
                .map(|object| {
                    log::trace!(target: "kernel::syscall", "{}: closed {object:?}", process.id());
                    0
                }),
            Syscall::IoRequest { token, request } => {
                return match process.lookup::<External>(token, Holder::Scheduler) {
                    Ok(external) => self.io_request(thread, &external, request),
                    Err(e) => Disposition::Resume(Err(e)),
                };
            }
            Syscall::BindInterrupt { line } => self.bind_interrupt(process, line),
        };
        Disposition::Resume(result)
    }

    fn sleep(&mut self, thread: &Ref<Thread>, ticks: u64) -> Disposition {
        if ticks == 0 {
            return Disposition::Resume(Ok(0));
        }
        let deadline = self.state.now.saturating_add(ticks);
        let timer = self
            .state
            .timers
            .insert(deadline, TimerAction::Resume(thread.id()));
        self.park(thread, ThreadEvent::DeferResume, ParkReason::Deferred { timer })
    }

    pub(super) fn set_affinity(&mut self, thread: &Thread, mask: CoreMask) -> CallResult {
        let mask = mask.intersect(CoreMask::first(self.kernel.config.cores));
        if mask.is_empty() {
            return Err(SyscallError::InvalidArgument);
        }
        thread.set_affinity(mask);
        Ok(0)
    }

    fn create_thread(&mut self, parent: &Ref<Thread>, entry: u64, arg: u64) -> CallResult {
        let process = parent.process();
        let thread = self
            .kernel
            .new_thread(process, entry, arg, parent.affinity())?;
        let token = match process.insert_token(&thread.clone_as(Holder::Scheduler).into_object()) {
            Ok(token) => token,
            Err(e) => {
                let e = SyscallError::from(e);
                self.exit_thread(thread, e.code(), None);
                return Err(e);
            }
        };
        thread.apply(ThreadEvent::Start);
        self.make_thread_run(thread);
        Ok(u64::from(token))
    }

    fn create_semaphore(&mut self, process: &Process, initial: u32, max: u32) -> CallResult {
        let semaphore = Semaphore::create(&self.kernel.arena, Holder::Scheduler, initial, max)?;
        let user = SemaphoreUser::create(&self.kernel.arena, Holder::Scheduler, &semaphore);
        let user = process.insert_token(&user.into_object())?;
        let semaphore = process.insert_token(&semaphore.into_object())?;
        Ok(u64::from(user) << 32 | u64::from(semaphore))
    }

    fn create_mailbox(&mut self, process: &Process, capacity: u32) -> CallResult {
        if capacity == 0 || capacity as usize > self.kernel.config.mailbox_capacity_limit {
            return Err(SyscallError::InvalidArgument);
        }
        let mailbox = Mailbox::create(&self.kernel.arena, Holder::Scheduler, capacity);
        let owner = MailboxOwner::create(&self.kernel.arena, Holder::Scheduler, &mailbox);
        let slot = Mailslot::create(&self.kernel.arena, Holder::Scheduler, &mailbox);
        drop(mailbox);
        let owner = process.insert_token(&owner.into_object())?;
        let slot = process.insert_token(&slot.into_object())?;
        Ok(u64::from(slot) << 32 | u64::from(owner))
    }

    /// Signals a notify directly or through a proxy.
    fn signal_notify(&mut self, object: &ObjectRef) -> Result<(), SyscallError> {
        let notify = if let Some(notify) = object.as_ref::<Notify>() {
            notify.clone_as(Holder::Scheduler)
        } else if let Some(proxy) = object.as_ref::<NotifyProxy>() {
            proxy.target(Holder::Scheduler).ok_or(SyscallError::Orphaned)?
        } else {
            return Err(SyscallError::WrongObjectType);
        };
        notify.raise();
        self.fan_out(&*notify);
        Ok(())
    }

    /// Signals any signalable object: gates open, notifies raise,
    /// semaphores gain one count.
    pub(super) fn signal_object(&mut self, object: &ObjectRef) -> Result<(), SyscallError> {
        if let Some(gate) = object.as_ref::<Gate>() {
            gate.open_fast();
            self.fan_out(&**gate);
            return Ok(());
        }
        if let Some(semaphore) = object.as_ref::<Semaphore>() {
            semaphore.add(1)?;
            self.fan_out(&**semaphore);
            return Ok(());
        }
        self.signal_notify(object)
    }

    fn release_semaphore(&mut self, process: &Process, token: u32, count: u32) -> CallResult {
        if count == 0 {
            return Err(SyscallError::InvalidArgument);
        }
        let object = process
            .token(token, Holder::Scheduler)
            .ok_or(SyscallError::InvalidToken)?;
        let semaphore = if let Some(user) = object.as_ref::<SemaphoreUser>() {
            user.note_returned(count)?;
            user.semaphore().clone_as(Holder::Scheduler)
        } else if let Some(semaphore) = object.as_ref::<Semaphore>() {
            semaphore.clone_as(Holder::Scheduler)
        } else {
            return Err(SyscallError::WrongObjectType);
        };
        semaphore.add(count)?;
        self.fan_out(&*semaphore);
        Ok(0)
    }

    pub(super) fn mailbox_send(&mut self, mailbox: &Mailbox, message: u64) -> CallResult {
        if mailbox.send(message)? {
            self.fan_out(&**mailbox.gate());
        }
        Ok(0)
    }

    pub(super) fn mailbox_receive(&mut self, mailbox: &Mailbox) -> CallResult {
        let (message, wake) = mailbox.receive()?;
        if wake {
            self.fan_out(&**mailbox.gate());
        }
        Ok(message)
    }

    fn arm_alarm(&mut self, alarm: &Ref<Alarm>, delay: u64, period: u64) -> u64 {
        if let Some(old) = alarm.with_timer(|t| t.key.take()) {
            self.state.timers.cancel(old);
        }
        let deadline = self.state.now.saturating_add(delay);
        let key = self
            .state
            .timers
            .insert(deadline, TimerAction::Alarm(alarm.downgrade()));
        alarm.with_timer(|t| {
            t.key = Some(key);
            t.period = period;
        });
        0
    }

    fn cancel_alarm(&mut self, alarm: &Alarm) -> u64 {
        let key = alarm.with_timer(|t| {
            t.period = 0;
            t.key.take()
        });
        if let Some(key) = key {
            self.state.timers.cancel(key);
        }
        0
    }

    fn io_request(
        &mut self,
        thread: &Ref<Thread>,
        external: &External,
        request: u64,
    ) -> Disposition {
        let Some(handler) = external.handler() else {
            return Disposition::Resume(Err(SyscallError::WrongObjectType));
        };
        match handler.submit(thread.id(), request) {
            IoSubmit::Complete(value) => Disposition::Resume(Ok(value)),
            IoSubmit::Pending => self.park(thread, ThreadEvent::BeginIo, ParkReason::Io),
        }
    }

    fn bind_interrupt(&mut self, process: &Process, line: InterruptId) -> CallResult {
        if line == XCI_VECTOR || line == TIMER_VECTOR {
            return Err(SyscallError::InvalidArgument);
        }
        let interrupt = {
            let mut table = self.kernel.irq_table.lock();
            if table.get(&line).is_some_and(|weak| weak.is_alive()) {
                return Err(SyscallError::InvalidArgument);
            }
            let interrupt = Interrupt::create(&self.kernel.arena, Holder::Scheduler, line);
            table.insert(line, interrupt.downgrade());
            interrupt
        };
        self.kernel.platform.set_enable(line, true);
        log::debug!(target: "kernel::irq", "line {line} bound by {}", process.id());
        token_for(process, interrupt.into_object())
    }
}

fn token_for(process: &Process, object: ObjectRef) -> CallResult {
    Ok(u64::from(process.insert_token(&object)?))
}
