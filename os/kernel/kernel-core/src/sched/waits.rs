use crate::error::{KernelError, SyscallError};
use crate::object::Ref;
use crate::sched::{Dispatcher, Disposition, ParkReason, Parked, TimerAction, TimerKey, WaitMode};
use crate::sync::{Mount, WaitTarget, Waitable, Waiter};
use crate::thread::{Thread, ThreadEvent, ThreadId};
use alloc::vec::Vec;
use kernel_hal::Platform;

#[derive(Debug)]
pub(crate) struct WaitEntry {
    pub target: WaitTarget,
    /// Consumed on behalf of this wait (only ever true for `All`).
    pub latched: bool,
}

/// A thread blocked on up to `max_wait_entries` objects at once.
#[derive(Debug)]
pub(crate) struct MacroWait {
    pub entries: Vec<WaitEntry>,
    pub mode: WaitMode,
    pub timer: Option<TimerKey>,
}

enum Claim {
    /// Waiter no longer interested; keep walking.
    Skip,
    /// Nothing left to hand out.
    Exhausted,
    Latched,
    Complete(u64),
}

impl<P: Platform> Dispatcher<'_, P> {
    /// Starts a macro-wait for `thread`.
    ///
    /// A zero timeout polls. Entries are mounted in order; under `Any` the
    /// first available one wins and nothing stays mounted.
    pub(super) fn start_wait(
        &mut self,
        thread: &Ref<Thread>,
        targets: Vec<WaitTarget>,
        mode: WaitMode,
        timeout: Option<u64>,
    ) -> Disposition {
        if targets.is_empty() {
            return Disposition::Resume(Err(SyscallError::InvalidArgument));
        }
        if targets.len() > self.kernel.config.max_wait_entries {
            log::warn!(target: "kernel::sched", "{}: {} wait entries", thread.id(), targets.len());
            return Disposition::Resume(Err(KernelError::TooManyWaitEntries.into()));
        }

        let tid = thread.id();
        let mut entries: Vec<WaitEntry> = Vec::with_capacity(targets.len());
        for (index, target) in targets.into_iter().enumerate() {
            let waiter = Waiter {
                thread: tid,
                entry: index,
            };
            let latched = target.acquire_or_mount(waiter) == Mount::Acquired;
            entries.push(WaitEntry { target, latched });
            if latched && mode == WaitMode::Any {
                for entry in &entries[..index] {
                    entry.target.dismount(tid);
                }
                return Disposition::Resume(Ok(index as u64));
            }
        }
        if mode == WaitMode::All && entries.iter().all(|e| e.latched) {
            return Disposition::Resume(Ok(0));
        }
        if timeout == Some(0) {
            self.abandon(tid, entries);
            return Disposition::Resume(Err(SyscallError::TimedOut));
        }

        let timer = timeout.map(|ticks| {
            let deadline = self.state.now.saturating_add(ticks);
            self.state.timers.insert(deadline, TimerAction::WaitTimeout(tid))
        });
        log::trace!(
            target: "kernel::sched",
            "{tid}: waiting on {} entries ({mode:?})",
            entries.len(),
        );
        self.park(
            thread,
            ThreadEvent::Block,
            ParkReason::Wait(MacroWait { entries, mode, timer }),
        )
    }

    /// Walks `source`'s waiters in FIFO order, handing out what it has.
    pub(crate) fn fan_out(&mut self, source: &dyn Waitable) {
        for waiter in source.waiters() {
            match self.claim_for(waiter) {
                Claim::Skip | Claim::Latched => {}
                Claim::Exhausted => break,
                Claim::Complete(result) => self.complete_wait(waiter.thread, result),
            }
        }
    }

    fn claim_for(&mut self, waiter: Waiter) -> Claim {
        let Some(Parked {
            reason: ParkReason::Wait(wait),
            ..
        }) = self.state.parked.get_mut(&waiter.thread)
        else {
            log::warn!(
                target: "kernel::sched",
                "{}: stale waiter entry {}",
                waiter.thread,
                waiter.entry,
            );
            return Claim::Skip;
        };
        let Some(entry) = wait.entries.get_mut(waiter.entry) else {
            return Claim::Skip;
        };
        if entry.latched {
            return Claim::Skip;
        }
        if !entry.target.claim(waiter) {
            return Claim::Exhausted;
        }
        entry.latched = true;
        match wait.mode {
            WaitMode::Any => Claim::Complete(waiter.entry as u64),
            WaitMode::All if wait.entries.iter().all(|e| e.latched) => Claim::Complete(0),
            WaitMode::All => Claim::Latched,
        }
    }

    fn complete_wait(&mut self, tid: ThreadId, result: u64) {
        let Some(parked) = self.state.parked.remove(&tid) else {
            return;
        };
        let ParkReason::Wait(wait) = parked.reason else {
            fatal!("{tid}: completed a wait it is not parked on");
        };
        if let Some(key) = wait.timer {
            self.state.timers.cancel(key);
        }
        for entry in &wait.entries {
            entry.target.dismount(tid);
        }
        drop(wait);
        self.wake(parked.thread, ThreadEvent::Wake, Ok(result));
    }

    pub(super) fn wait_timed_out(&mut self, tid: ThreadId) {
        let Some(parked) = self.state.parked.remove(&tid) else {
            return;
        };
        let ParkReason::Wait(wait) = parked.reason else {
            fatal!("{tid}: wait timer fired for a thread that is not waiting");
        };
        log::trace!(target: "kernel::sched", "{tid}: wait timed out");
        self.abandon(tid, wait.entries);
        self.wake(parked.thread, ThreadEvent::Wake, Err(SyscallError::TimedOut));
    }

    /// Gives back everything a wait that will not complete had consumed,
    /// then lets other waiters have it.
    pub(super) fn abandon(&mut self, tid: ThreadId, entries: Vec<WaitEntry>) {
        for entry in &entries {
            entry.target.dismount(tid);
        }
        for entry in entries.iter().filter(|e| e.latched) {
            entry.target.unconsume();
        }
        for entry in entries.iter().filter(|e| e.latched) {
            self.fan_out(entry.target.waitable());
        }
    }

    /// Removes a parked thread so it can exit. Waits, timers and holds are
    /// released first.
    pub(super) fn unpark(&mut self, tid: ThreadId) -> Option<Ref<Thread>> {
        let parked = self.state.parked.remove(&tid)?;
        match parked.reason {
            ParkReason::Wait(wait) => {
                if let Some(key) = wait.timer {
                    self.state.timers.cancel(key);
                }
                self.abandon(tid, wait.entries);
            }
            ParkReason::Deferred { timer } => {
                self.state.timers.cancel(timer);
            }
            ParkReason::Io | ParkReason::DebugHold => {}
        }
        Some(parked.thread)
    }
}
