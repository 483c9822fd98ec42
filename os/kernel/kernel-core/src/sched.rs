//! # Locked Scheduler
//!
//! Any core appends [`SchedRequest`]s to one lock-free list; only the
//! scheduling core drains it, from its monitor. Every request carries the
//! tick it was enqueued at. Before dispatching it the scheduler advances its
//! logical clock to `max(now, stamp)` and fires every timer due by then, so
//! a request enqueued late with an early stamp is a harmless no-op on time.
//!
//! State the scheduler owns outright:
//!
//! * the timer queue (wait timeouts, deferred resumes, alarms),
//! * the parked map: every thread in `Waiting`, `InIo`,
//!   `InSchedulerResumeDeferred` or `DebugCrashed`, with what it waits for.
//!
//! Handlers run on a [`Dispatcher`], which bundles the kernel, the locked
//! state and the core doing the work.

mod calls;
mod kernel_ops;
mod lifecycle;
mod placement;
mod request;
mod timer;
mod waits;

pub use request::{KernelOp, KernelOpResult, WaitMode};
pub use timer::{TimerKey, TimerQueue};

pub(crate) use request::{Call, RequestKind, SchedRequest};
pub(crate) use waits::MacroWait;

use crate::error::SyscallError;
use crate::kernel::Kernel;
use crate::object::{ObjectRef, Ref, WeakRef};
use crate::sync::Alarm;
use crate::thread::{Thread, ThreadEvent, ThreadId};
use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU64, Ordering};
use kernel_hal::{CoreId, Platform};
use kernel_sync::{PushList, SpinLock};

const NO_DEADLINE: u64 = u64::MAX;

#[derive(Debug)]
pub(crate) enum TimerAction {
    WaitTimeout(ThreadId),
    /// End of a deferred resume.
    Resume(ThreadId),
    Alarm(WeakRef<Alarm>),
}

#[derive(Debug)]
pub(crate) enum ParkReason {
    Wait(MacroWait),
    Io,
    Deferred { timer: TimerKey },
    DebugHold,
}

#[derive(Debug)]
pub(crate) struct Parked {
    pub thread: Ref<Thread>,
    pub reason: ParkReason,
}

#[derive(Debug, Default)]
pub(crate) struct SchedState {
    pub now: u64,
    pub timers: TimerQueue<TimerAction>,
    pub parked: BTreeMap<ThreadId, Parked>,
}

#[derive(Debug)]
pub(crate) struct Scheduler {
    pub state: SpinLock<SchedState>,
    pub requests: PushList<SchedRequest>,
    next_deadline: AtomicU64,
    dispatched: AtomicU64,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            state: SpinLock::new(SchedState::default()),
            requests: PushList::new(),
            next_deadline: AtomicU64::new(NO_DEADLINE),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Earliest queued timer, as last published by the scheduling core.
    pub(crate) fn next_deadline(&self) -> Option<u64> {
        match self.next_deadline.load(Ordering::Acquire) {
            NO_DEADLINE => None,
            d => Some(d),
        }
    }

    pub(crate) fn has_requests(&self) -> bool {
        !self.requests.is_empty()
    }

    pub(crate) fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }
}

/// What happens to the calling thread after its call was handled.
#[derive(Debug)]
pub(crate) enum Disposition {
    Resume(Result<u64, SyscallError>),
    ResumeObject(ObjectRef),
    /// The handler parked the thread.
    Parked,
    /// The thread exited.
    Gone,
}

pub(crate) struct Dispatcher<'k, P: Platform> {
    pub kernel: &'k Kernel<P>,
    pub state: &'k mut SchedState,
    /// The scheduling core.
    pub core: CoreId,
}

impl<P: Platform> Kernel<P> {
    /// Appends a scheduler request stamped with the current tick.
    ///
    /// The first request of an empty list wakes the scheduling core when it
    /// comes from another core.
    pub(crate) fn enqueue(&self, kind: RequestKind) {
        let stamp = self.platform.read_tick();
        log::trace!(target: "kernel::sched", "enqueue {} at {stamp}", kind.name());
        let was_empty = self.sched.requests.push(SchedRequest { stamp, kind });
        if !was_empty {
            return;
        }
        let target = self.config.scheduling_core;
        match self.platform.current_core() {
            Some(from) if from != target => self.post_xci(from, target, crate::xci::Xci::Wake),
            _ => {}
        }
    }

    /// Drains and dispatches every queued request. Scheduling core only.
    pub(crate) fn run_scheduler(&self, core: CoreId) {
        if core != self.config.scheduling_core {
            fatal!("scheduler entered on {core:?}, not the scheduling core");
        }
        let requests = self.sched.requests.take_all();
        let mut state = self.sched.state.lock();
        let mut dispatcher = Dispatcher {
            kernel: self,
            state: &mut state,
            core,
        };
        for request in requests {
            dispatcher.advance(request.stamp);
            dispatcher.dispatch(request.kind);
            self.sched.dispatched.fetch_add(1, Ordering::Relaxed);
        }
        let next = state.timers.next_deadline().unwrap_or(NO_DEADLINE);
        self.sched.next_deadline.store(next, Ordering::Release);
    }
}

impl<P: Platform> Dispatcher<'_, P> {
    /// Moves logical time forward and fires what became due.
    fn advance(&mut self, stamp: u64) {
        if stamp <= self.state.now {
            return;
        }
        self.state.now = stamp;
        for (deadline, action) in self.state.timers.expire(stamp) {
            log::trace!(
                target: "kernel::sched",
                "timer {action:?} due at {deadline} fired at {stamp}"
            );
            self.fire(deadline, action);
        }
    }

    fn fire(&mut self, deadline: u64, action: TimerAction) {
        match action {
            TimerAction::WaitTimeout(tid) => self.wait_timed_out(tid),
            TimerAction::Resume(tid) => self.deferred_elapsed(tid),
            TimerAction::Alarm(alarm) => {
                if let Some(alarm) = alarm.upgrade(crate::object::Holder::Scheduler) {
                    self.alarm_fired(&alarm, deadline);
                }
            }
        }
    }

    fn dispatch(&mut self, kind: RequestKind) {
        log::trace!(target: "kernel::sched", "dispatch {} at {}", kind.name(), self.state.now);
        match kind {
            RequestKind::StartThread(thread) => {
                if thread.is_abort_requested() {
                    self.exit_aborted(thread);
                } else {
                    thread.apply(ThreadEvent::Start);
                    self.make_thread_run(thread);
                }
            }
            RequestKind::Syscall { thread, call } => self.run_call(thread, call),
            RequestKind::Aborted { thread, crash } => self.thread_aborted(thread, crash),
            RequestKind::Requeue(thread) => self.make_thread_run(thread),
            RequestKind::StopProcess { process, code } => self.begin_process_stop(&process, code),
            RequestKind::ProcessStopped(process) => self.process_stopped(&process),
            RequestKind::TimerTick => {}
            RequestKind::AlarmCancel(key) => {
                self.state.timers.cancel(key);
            }
            RequestKind::SemaphoreReturn { semaphore, count } => {
                if semaphore.add(count).is_err() {
                    log::warn!(
                        target: "kernel::sched",
                        "semaphore#{} overflowed returning {count}",
                        semaphore.object_id(),
                    );
                }
                self.fan_out(&*semaphore);
            }
            RequestKind::InterruptPulse(gate) => {
                gate.open_fast();
                self.fan_out(&*gate);
            }
            RequestKind::GateWake(gate) => self.fan_out(&*gate),
            RequestKind::Signal(object) => {
                if let Err(e) = self.signal_object(&object) {
                    log::debug!(target: "kernel::sched", "signal of {object:?} failed: {e}");
                }
            }
            RequestKind::IoComplete { thread, result } => self.io_complete(thread, result),
            RequestKind::DebugRelease(process) => self.debug_release(&process),
        }
    }

    fn run_call(&mut self, thread: Ref<Thread>, call: Call) {
        if thread.is_abort_requested() {
            self.exit_aborted(thread);
            return;
        }
        let disposition = match call {
            Call::User(call) => self.dispatch_syscall(&thread, call),
            Call::Kernel(op) => self.dispatch_kernel_op(&thread, op),
        };
        self.settle(thread, disposition);
    }

    fn settle(&mut self, thread: Ref<Thread>, disposition: Disposition) {
        match disposition {
            Disposition::Resume(result) => {
                thread.set_result(result);
                self.make_thread_run(thread);
            }
            Disposition::ResumeObject(object) => {
                thread.set_object_result(object);
                self.make_thread_run(thread);
            }
            Disposition::Parked | Disposition::Gone => {}
        }
    }

    /// Returns a parked thread to the runnable path.
    fn wake(&mut self, thread: Ref<Thread>, event: ThreadEvent, result: Result<u64, SyscallError>) {
        thread.apply(event);
        thread.set_result(result);
        self.make_thread_run(thread);
    }

    fn park(
        &mut self,
        thread: &Ref<Thread>,
        event: ThreadEvent,
        reason: ParkReason,
    ) -> Disposition {
        thread.apply(event);
        self.state.parked.insert(
            thread.id(),
            Parked {
                thread: thread.clone_as(crate::object::Holder::Scheduler),
                reason,
            },
        );
        Disposition::Parked
    }

    fn deferred_elapsed(&mut self, tid: ThreadId) {
        match self.state.parked.remove(&tid) {
            Some(Parked {
                thread,
                reason: ParkReason::Deferred { .. },
            }) => self.wake(thread, ThreadEvent::DeferElapsed, Ok(0)),
            Some(other) => {
                self.state.parked.insert(tid, other);
            }
            None => {}
        }
    }

    fn io_complete(&mut self, tid: ThreadId, result: Result<u64, SyscallError>) {
        match self.state.parked.remove(&tid) {
            Some(Parked {
                thread,
                reason: ParkReason::Io,
            }) => self.wake(thread, ThreadEvent::Complete, result),
            Some(other) => {
                log::debug!(target: "kernel::sched", "{tid}: I/O completion while not in I/O");
                self.state.parked.insert(tid, other);
            }
            None => {
                log::debug!(
                    target: "kernel::sched",
                    "{tid}: I/O completion for a thread that is gone"
                );
            }
        }
    }

    fn alarm_fired(&mut self, alarm: &Ref<Alarm>, deadline: u64) {
        let now = self.state.now;
        let rearm = alarm.with_timer(|t| {
            t.key = None;
            (t.period > 0).then_some(t.period)
        });
        if let Some(period) = rearm {
            // Catch up without drifting: next deadline on the original grid.
            let mut next = deadline.saturating_add(period);
            if next <= now {
                next = now + period - (now - deadline) % period;
            }
            let key = self
                .state
                .timers
                .insert(next, TimerAction::Alarm(alarm.downgrade()));
            alarm.with_timer(|t| t.key = Some(key));
        }
        let gate = alarm.gate();
        gate.open_fast();
        self.fan_out(&**gate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KernelConfig;
    use alloc::sync::Arc;
    use kernel_hal_mock::MockPlatform;

    fn kernel() -> Kernel<MockPlatform> {
        let platform = Arc::new(MockPlatform::new(1, 1_024));
        Kernel::new(KernelConfig::with_cores(1), platform).unwrap()
    }

    /// Queues requests carrying `stamps`, in that order, and dispatches them.
    fn dispatch_stamped(kernel: &Kernel<MockPlatform>, stamps: &[u64]) {
        for &stamp in stamps {
            kernel.sched.requests.push(SchedRequest {
                stamp,
                kind: RequestKind::TimerTick,
            });
        }
        let _on = kernel.platform().enter_core(CoreId(0));
        kernel.run_scheduler(CoreId(0));
    }

    fn alarm_at(kernel: &Kernel<MockPlatform>, deadline: u64) -> Ref<Alarm> {
        let alarm = kernel.create_alarm();
        let key = kernel
            .sched
            .state
            .lock()
            .timers
            .insert(deadline, TimerAction::Alarm(alarm.downgrade()));
        alarm.with_timer(|t| t.key = Some(key));
        alarm
    }

    #[test]
    fn late_and_stale_stamps_never_move_time_back() {
        let k = kernel();
        let early = alarm_at(&k, 100);
        let middle = alarm_at(&k, 140);
        let late = alarm_at(&k, 200);

        dispatch_stamped(&k, &[120, 50]);
        assert_eq!(k.now(), 120);
        assert!(!early.is_armed());
        assert!(early.gate().is_open());
        assert!(middle.is_armed());

        // Nothing past the largest stamp fires.
        dispatch_stamped(&k, &[150, 130]);
        assert_eq!(k.now(), 150);
        assert!(!middle.is_armed());
        assert!(late.is_armed());
        assert_eq!(k.next_timer_deadline(), Some(200));

        dispatch_stamped(&k, &[10]);
        assert_eq!(k.now(), 150);
        assert!(late.is_armed());
        assert!(!late.gate().is_open());

        dispatch_stamped(&k, &[200]);
        assert_eq!(k.now(), 200);
        assert!(!late.is_armed());
        assert!(late.gate().is_open());
        assert_eq!(k.next_timer_deadline(), None);
        assert_eq!(k.scheduler_dispatched(), 6);
    }
}
