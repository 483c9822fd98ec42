use crate::cpu::{CoreAction, Cpu, Dpc, DpcPriority, Event, bump};
use crate::kernel::Kernel;
use crate::object::{Holder, Ref};
use crate::sched::RequestKind;
use crate::thread::{Thread, ThreadEvent, ThreadId};
use crate::xci::Xci;
use alloc::vec::Vec;
use core::sync::atomic::{Ordering, fence};
use kernel_hal::{CoreId, CoreMask, Platform, TIMER_VECTOR, XCI_VECTOR};
use kernel_sync::IrqGuard;

/// Monitor passes before yielding to the caller with work still arriving.
const PASS_LIMIT: u32 = 64;

/// A thread the selection step sends back to the scheduler.
enum Evicted {
    Aborted(Ref<Thread>),
    Requeue(Ref<Thread>),
}

impl<P: Platform> Kernel<P> {
    /// Runs the monitor of `core` until it has a decision.
    ///
    /// Each pass drains, in order: the reclaim queue (into high DPCs), the
    /// migrating list, the event list, one high DPC, the scheduler (on the
    /// scheduling core), one medium DPC and the shootdowns this core waits
    /// on. When a pass finds nothing new it selects a thread, or runs one low
    /// DPC, or goes idle.
    pub fn monitor(&self, core: CoreId) -> CoreAction {
        let cpu = self.cpu(core);
        let _irq = IrqGuard::new(&*self.platform);
        let mut passes = 0;
        let action = loop {
            if cpu.is_halted() {
                break CoreAction::Halted;
            }
            passes += 1;
            bump(&cpu.stats.passes);
            cpu.set_idle(false);

            let mut progressed = self.drain_reclaims(core);
            progressed |= self.drain_migrating(cpu);
            progressed |= self.handle_events(core);
            progressed |= self.run_one_dpc(core, DpcPriority::High);
            if core == self.config.scheduling_core && self.sched.has_requests() {
                self.run_scheduler(core);
                progressed = true;
            }
            progressed |= self.run_one_dpc(core, DpcPriority::Medium);
            progressed |= self.advance_shootdowns(core);

            if progressed {
                if passes >= PASS_LIMIT {
                    break CoreAction::Reschedule;
                }
                continue;
            }
            if let Some(thread) = self.select_thread(core) {
                break CoreAction::RunThread(thread);
            }
            if self.run_one_dpc(core, DpcPriority::Low) {
                if passes >= PASS_LIMIT {
                    break CoreAction::RunDpc;
                }
                continue;
            }

            cpu.set_idle(true);
            let unmapped = cpu.local.lock().mapped.take();
            drop(unmapped);
            if self.has_new_work(core) {
                // Lost a race with a producer that saw us busy.
                continue;
            }
            bump(&cpu.stats.idles);
            break CoreAction::Idle;
        };
        self.arm_core_timer(core);
        log::trace!(target: "kernel::cpu", "{core:?}: {action:?} after {passes} passes");
        action
    }

    fn has_new_work(&self, core: CoreId) -> bool {
        let cpu = self.cpu(core);
        !cpu.migrating.is_empty()
            || !cpu.events.is_empty()
            || self.arena.has_pending(core)
            || cpu.local.lock().has_dpcs()
            || (core == self.config.scheduling_core && self.sched.has_requests())
    }

    fn drain_reclaims(&self, core: CoreId) -> bool {
        let mut drained = false;
        for object in self.arena.take(core) {
            drained = true;
            self.push_dpc(core, DpcPriority::High, Dpc::Reclaim(object));
        }
        drained
    }

    fn drain_migrating(&self, cpu: &Cpu) -> bool {
        let mut arrived = false;
        for thread in cpu.migrating.take_all() {
            arrived = true;
            thread.apply(ThreadEvent::Arrive);
            cpu.local.lock().migrated.push_back(thread);
        }
        arrived
    }

    fn run_one_dpc(&self, core: CoreId, priority: DpcPriority) -> bool {
        let Some(dpc) = self.cpu(core).pop_dpc(priority) else {
            return false;
        };
        self.run_dpc(core, dpc);
        true
    }

    /// Picks the thread to run, sending back threads this core can no
    /// longer hold.
    fn select_thread(&self, core: CoreId) -> Option<ThreadId> {
        let cpu = self.cpu(core);
        let mut evicted = Vec::new();
        let selected = {
            let mut guard = cpu.local.lock();
            let local = &mut *guard;

            if let Some(active) = local.active.take() {
                if active.is_abort_requested() {
                    active.apply(ThreadEvent::Abort);
                    evicted.push(Evicted::Aborted(active));
                } else if !active.affinity().contains(core) {
                    active.apply(ThreadEvent::Preempt);
                    active.apply(ThreadEvent::Requeue);
                    evicted.push(Evicted::Requeue(active));
                } else if active.quantum() > 0 {
                    local.active = Some(active);
                } else {
                    active.apply(ThreadEvent::Preempt);
                    local.ran.push_back(active);
                }
            }

            for list in [&mut local.run, &mut local.ran, &mut local.migrated] {
                let mut kept = list.len();
                while kept > 0 {
                    kept -= 1;
                    let Some(thread) = list.pop_front() else { break };
                    if thread.is_abort_requested() {
                        thread.apply(ThreadEvent::Abort);
                        evicted.push(Evicted::Aborted(thread));
                    } else if !thread.affinity().contains(core) {
                        thread.apply(ThreadEvent::Requeue);
                        evicted.push(Evicted::Requeue(thread));
                    } else {
                        list.push_back(thread);
                    }
                }
            }

            if local.active.is_some() {
                local.active.as_ref().map(|t| t.id())
            } else {
                if local.run.is_empty() {
                    let runnable = local.ran.len() + local.migrated.len();
                    if runnable > 0 {
                        let quantum = self.config.quantum_for(runnable);
                        let mut refill: Vec<Ref<Thread>> = local.ran.drain(..).collect();
                        refill.extend(local.migrated.drain(..));
                        for thread in refill {
                            thread.set_quantum(quantum);
                            local.run.push_back(thread);
                        }
                        local.epoch += 1;
                        bump(&cpu.stats.epochs);
                        log::trace!(
                            target: "kernel::cpu",
                            "{core:?}: epoch {} with {runnable} threads at {quantum}",
                            local.epoch,
                        );
                    }
                }
                local.run.pop_front().map(|next| {
                    next.apply(ThreadEvent::Resume);
                    next.set_last_core(core);
                    let tid = next.id();
                    if !next.is_kernel()
                        && local.mapped.as_ref().is_none_or(|p| p.id() != next.process().id())
                    {
                        self.platform.activate(core, next.process().space());
                        local.mapped = Some(next.process().clone_as(Holder::Core(core)));
                    }
                    local.active = Some(next);
                    bump(&cpu.stats.resumes);
                    cpu.set_next_tick(Some(self.platform.read_tick() + self.config.tick_length));
                    tid
                })
            }
        };

        for thread in evicted {
            cpu.note_left();
            match thread {
                Evicted::Aborted(thread) => self.enqueue(RequestKind::Aborted {
                    thread: thread.clone_as(Holder::Scheduler),
                    crash: None,
                }),
                Evicted::Requeue(thread) => {
                    self.enqueue(RequestKind::Requeue(thread.clone_as(Holder::Scheduler)));
                }
            }
        }
        if selected.is_none() {
            cpu.set_next_tick(None);
        }
        selected
    }

    /// Services everything the interrupt controller has pending for `core`.
    ///
    /// Returns whether the core should enter its monitor.
    pub fn service_interrupts(&self, core: CoreId) -> bool {
        let cpu = self.cpu(core);
        if cpu.in_interrupt.swap(true, Ordering::AcqRel) {
            fatal!("{core:?}: interrupt servicing re-entered");
        }
        let mut enter = false;
        while let Some(id) = self.platform.ack(core) {
            match id {
                XCI_VECTOR => enter |= self.drain_inbox(core),
                TIMER_VECTOR => enter |= self.timer_interrupt(core),
                line => {
                    if self.irq_table.lock().contains_key(&line) {
                        cpu.events.push(Event::Interrupt(line));
                        enter = true;
                    } else {
                        log::warn!(target: "kernel::irq", "{core:?}: spurious line {line}");
                    }
                }
            }
            self.platform.end_of_interrupt(core, id);
        }
        self.arm_core_timer(core);
        cpu.in_interrupt.store(false, Ordering::Release);
        enter
    }

    fn drain_inbox(&self, core: CoreId) -> bool {
        let cpu = self.cpu(core);
        // A bare vector is a doorbell for work that stalled on a busy slot.
        let mut enter = cpu.release_stalled();
        for (sender, slot) in cpu.inbox.iter().enumerate() {
            let Some(message) = slot.take() else {
                continue;
            };
            fence(Ordering::SeqCst);
            let from = CoreId(sender as u32);
            if self.cpu(from).slot_freed(core) {
                self.platform.send_directed_interrupt(CoreMask::single(from), XCI_VECTOR);
            }
            bump(&cpu.stats.xci_received);
            log::trace!(target: "kernel::xci", "{core:?}: {message:?} from core {sender}");
            match message {
                Xci::TlbInvalidate(request)
                    if request.pages() <= self.config.direct_invalidate_pages =>
                {
                    self.service_shootdown(core, &request);
                }
                Xci::Panic => cpu.halt(),
                other @ (Xci::TlbInvalidate(_) | Xci::StopProcess(_)) => {
                    cpu.events.push(Event::Xci(other));
                }
                Xci::Wake => {}
            }
            enter = true;
        }
        enter
    }

    /// Charges the active thread's quantum and forwards due scheduler timers.
    fn timer_interrupt(&self, core: CoreId) -> bool {
        let cpu = self.cpu(core);
        let now = self.platform.read_tick();
        let mut enter = false;
        if let Some(due) = cpu.next_tick().filter(|&t| t <= now) {
            let ticks = 1 + (now - due) / self.config.tick_length;
            let left = {
                let local = cpu.local.lock();
                local
                    .active
                    .as_ref()
                    .map(|t| t.tick(u32::try_from(ticks).unwrap_or(u32::MAX)))
            };
            match left {
                Some(0) => enter = true,
                Some(_) => cpu.set_next_tick(Some(due + ticks * self.config.tick_length)),
                None => cpu.set_next_tick(None),
            }
        }
        if core == self.config.scheduling_core
            && self.sched.next_deadline().is_some_and(|d| d <= now)
        {
            cpu.events.push(Event::TimerFire);
            enter = true;
        }
        enter
    }

    /// Programs the one-shot timer for the nearest of the quantum tick and,
    /// on the scheduling core, the earliest scheduler timer.
    pub(crate) fn arm_core_timer(&self, core: CoreId) {
        let cpu = self.cpu(core);
        let tick = cpu.next_tick();
        let sched = if core == self.config.scheduling_core {
            self.sched.next_deadline()
        } else {
            None
        };
        match tick.into_iter().chain(sched).min() {
            Some(deadline) => {
                let now = self.platform.read_tick();
                self.platform.arm(core, deadline.saturating_sub(now));
            }
            None => self.platform.disarm(core),
        }
    }
}
