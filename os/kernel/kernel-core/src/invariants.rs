//! Whole-kernel consistency checks for tests and debug builds.

use crate::kernel::Kernel;
use crate::object::{Holder, ObjectHeader, ObjectId};
use crate::process::ProcessId;
use crate::thread::{ThreadId, ThreadState};
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use kernel_hal::{CoreId, Platform};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("{core:?}: active {thread} is {state:?}")]
    ActiveNotRunning {
        core: CoreId,
        thread: ThreadId,
        state: ThreadState,
    },
    #[error("{core:?}: active {thread} last ran on {last:?}")]
    ActiveOnWrongCore {
        core: CoreId,
        thread: ThreadId,
        last: Option<CoreId>,
    },
    #[error("{core:?}: listed {thread} is {state:?}")]
    ListedNotOnCpuLists {
        core: CoreId,
        thread: ThreadId,
        state: ThreadState,
    },
    #[error("{thread} is on more than one core list")]
    ThreadOnMultipleLists { thread: ThreadId },
    #[error("parked {thread} is {state:?}")]
    ParkedNotParked { thread: ThreadId, state: ThreadState },
    #[error("object #{object}: count {count} but {records} reference records")]
    ReferenceAudit {
        object: ObjectId,
        count: u32,
        records: usize,
    },
    #[error("timer due at {deadline} still queued at {now}")]
    TimerOrder { deadline: u64, now: u64 },
}

impl<P: Platform> Kernel<P> {
    /// Audits core lists, the parked map, timers and reference records.
    ///
    /// Call it between monitor runs; it takes every core's list lock.
    #[must_use]
    pub fn check_invariants(&self) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        self.check_core_lists(&mut violations);
        self.check_scheduler(&mut violations);
        self.check_references(&mut violations);
        for violation in &violations {
            log::warn!(target: "kernel::invariants", "{violation}");
        }
        violations
    }

    fn check_core_lists(&self, violations: &mut Vec<InvariantViolation>) {
        let mut seen = BTreeSet::new();
        for cpu in &*self.cores {
            let core = cpu.id();
            let local = cpu.local.lock();
            if let Some(active) = &local.active {
                let thread = active.id();
                let state = active.state();
                if state != ThreadState::Running {
                    violations.push(InvariantViolation::ActiveNotRunning { core, thread, state });
                }
                if active.last_core() != Some(core) {
                    violations.push(InvariantViolation::ActiveOnWrongCore {
                        core,
                        thread,
                        last: active.last_core(),
                    });
                }
                if !seen.insert(thread) {
                    violations.push(InvariantViolation::ThreadOnMultipleLists { thread });
                }
            }
            for listed in local.lists() {
                let thread = listed.id();
                let state = listed.state();
                if state != ThreadState::OnCpuLists {
                    violations.push(InvariantViolation::ListedNotOnCpuLists {
                        core,
                        thread,
                        state,
                    });
                }
                if !seen.insert(thread) {
                    violations.push(InvariantViolation::ThreadOnMultipleLists { thread });
                }
            }
        }
    }

    fn check_scheduler(&self, violations: &mut Vec<InvariantViolation>) {
        let state = self.sched.state.lock();
        for (&thread, parked) in &state.parked {
            let current = parked.thread.state();
            if !current.is_parked() {
                violations.push(InvariantViolation::ParkedNotParked { thread, state: current });
            }
        }
        if let Some(deadline) = state.timers.next_deadline().filter(|&d| d < state.now) {
            violations.push(InvariantViolation::TimerOrder {
                deadline,
                now: state.now,
            });
        }
    }

    /// Audits every thread, its process and its exit gate, and whatever the
    /// processes' token tables name.
    fn check_references(&self, violations: &mut Vec<InvariantViolation>) {
        const AUDIT: Holder = Holder::Kernel("audit");
        let threads: Vec<_> = self
            .threads
            .lock()
            .values()
            .filter_map(|t| t.upgrade(AUDIT))
            .collect();

        let mut processes = BTreeMap::<ProcessId, _>::new();
        processes.insert(self.kernel_process().id(), self.kernel_process().clone_as(AUDIT));
        for thread in &threads {
            let process = thread.process();
            processes
                .entry(process.id())
                .or_insert_with(|| process.clone_as(AUDIT));
        }

        let mut audit = |header: &ObjectHeader| {
            if let Err((count, records)) = header.audit() {
                violations.push(InvariantViolation::ReferenceAudit {
                    object: header.id(),
                    count,
                    records,
                });
            }
        };
        for thread in &threads {
            audit(thread.header());
            audit(thread.exit_gate().header());
        }
        for process in processes.values() {
            audit(process.header());
            audit(process.exit_gate().header());
            for object in process.token_objects(AUDIT) {
                audit(object.header());
            }
        }
    }
}
