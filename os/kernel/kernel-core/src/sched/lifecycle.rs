use crate::cpu::{Dpc, DpcPriority};
use crate::error::SyscallError;
use crate::ipc::EndpointState;
use crate::kernel::Kernel;
use crate::object::{Holder, Ref};
use crate::process::{Process, ProcessLifecycle};
use crate::sched::{Dispatcher, ParkReason, Parked, RequestKind};
use crate::thread::{Fault, Thread, ThreadEvent, ThreadId, ThreadState};
use crate::xci::Xci;
use alloc::vec::Vec;
use kernel_hal::{CoreId, Platform};

impl<P: Platform> Dispatcher<'_, P> {
    /// Terminates a thread owned by the scheduler.
    pub(super) fn exit_thread(&mut self, thread: Ref<Thread>, code: i64, fault: Option<Fault>) {
        thread.apply(ThreadEvent::Exit);
        thread.set_exit(code, fault);
        thread.release_memory();
        log::debug!(target: "kernel::sched", "{} exited with {code}", thread.id());

        let gate = thread.exit_gate().clone_as(Holder::Scheduler);
        gate.open_fast();
        self.fan_out(&*gate);

        let process = thread.process().clone_as(Holder::Scheduler);
        drop(thread);
        let queue_stop = process.with_state(|s| {
            if s.live_threads == 0 {
                fatal!("{}: live thread count underflow", process.id());
            }
            s.live_threads -= 1;
            if s.live_threads > 0 || process.is_kernel() {
                return false;
            }
            if s.lifecycle == ProcessLifecycle::Running {
                s.lifecycle = ProcessLifecycle::Stopping;
                s.exit_code.get_or_insert(code);
            }
            !core::mem::replace(&mut s.stop_queued, true)
        });
        if queue_stop {
            self.kernel
                .push_dpc(self.core, DpcPriority::Medium, Dpc::ProcessStop(process));
        }
    }

    /// Exits a thread whose abort flag was found set.
    pub(super) fn exit_aborted(&mut self, thread: Ref<Thread>) {
        let code = thread
            .process()
            .exit_code()
            .unwrap_or(SyscallError::Aborted.code());
        self.exit_thread(thread, code, None);
    }

    pub(super) fn thread_aborted(&mut self, thread: Ref<Thread>, crash: Option<Fault>) {
        let Some(fault) = crash else {
            self.exit_aborted(thread);
            return;
        };
        if thread.is_kernel() {
            fatal!("kernel thread {} raised {fault:?}", thread.id());
        }
        let process = thread.process().clone_as(Holder::Scheduler);
        if process.debugger_attached() && !thread.is_abort_requested() {
            log::warn!(
                target: "kernel::sched",
                "{} raised {fault:?}; held for the debugger",
                thread.id(),
            );
            thread.set_fault(fault);
            self.park(&thread, ThreadEvent::Crash, ParkReason::DebugHold);
            return;
        }
        log::warn!(
            target: "kernel::sched",
            "{} raised {fault:?}; stopping {}",
            thread.id(),
            process.id(),
        );
        let code = fault.exit_code();
        self.begin_process_stop(&process, code);
        self.exit_thread(thread, code, Some(fault));
    }

    /// Moves a running process to `Stopping` and aborts its threads.
    ///
    /// Threads the scheduler holds exit right away. Threads on another core
    /// get there through a stop message; the rest find the abort flag on
    /// their way through the scheduler.
    pub(super) fn begin_process_stop(&mut self, process: &Ref<Process>, code: i64) {
        if process.is_kernel() {
            fatal!("attempt to stop the kernel process");
        }
        let begun = process.with_state(|s| {
            if s.lifecycle != ProcessLifecycle::Running {
                return false;
            }
            s.lifecycle = ProcessLifecycle::Stopping;
            s.exit_code = Some(code);
            true
        });
        if !begun {
            return;
        }
        log::info!(
            target: "kernel::sched",
            "stopping {} ({}) with {code}",
            process.id(),
            process.name(),
        );

        for thread in process.threads(Holder::Scheduler) {
            thread.request_abort();
            match thread.state() {
                state if state.is_parked() => {
                    if let Some(parked) = self.unpark(thread.id()) {
                        self.exit_aborted(parked);
                    }
                }
                ThreadState::Running | ThreadState::OnCpuLists | ThreadState::Migrating => {
                    if let Some(core) = thread.last_core().filter(|&c| c != self.core) {
                        self.kernel.post_xci(self.core, core, Xci::StopProcess(process.id()));
                    }
                }
                _ => {}
            }
        }

        let queue_stop =
            process.with_state(|s| {
                s.live_threads == 0 && !core::mem::replace(&mut s.stop_queued, true)
            });
        if queue_stop {
            self.kernel.push_dpc(
                self.core,
                DpcPriority::Medium,
                Dpc::ProcessStop(process.clone_as(Holder::Dpc)),
            );
        }
    }

    pub(super) fn process_stopped(&mut self, process: &Ref<Process>) {
        process.with_state(|s| s.lifecycle = ProcessLifecycle::Stopped);
        log::info!(
            target: "kernel::sched",
            "{} stopped with {}",
            process.id(),
            process.exit_code().unwrap_or_default()
        );
        let gate = process.exit_gate().clone_as(Holder::Scheduler);
        gate.open_fast();
        self.fan_out(&*gate);
    }

    /// Tears down every thread of `process` held for the debugger.
    pub(super) fn debug_release(&mut self, process: &Ref<Process>) {
        let held: Vec<ThreadId> = self
            .state
            .parked
            .iter()
            .filter(|(_, p)| {
                matches!(p.reason, ParkReason::DebugHold) && p.thread.process().id() == process.id()
            })
            .map(|(&tid, _)| tid)
            .collect();
        for tid in held {
            let Some(Parked { thread, .. }) = self.state.parked.remove(&tid) else {
                continue;
            };
            thread.apply(ThreadEvent::Release);
            let fault = thread.fault();
            let code = fault.map_or(SyscallError::Aborted.code(), Fault::exit_code);
            self.begin_process_stop(process, code);
            self.exit_thread(thread, code, fault);
        }
    }
}

impl<P: Platform> Kernel<P> {
    /// Runs the stop DPC: releases the token table, disconnects endpoints
    /// and reports the process as stopped.
    pub(crate) fn finish_process_stop(&self, core: CoreId, process: Ref<Process>) {
        let tokens = process.drain_tokens();
        log::debug!(
            target: "kernel::process",
            "{}: releasing {} tokens on {core:?}",
            process.id(),
            tokens.len(),
        );
        drop(tokens);

        for endpoint in process.take_endpoints() {
            let Some(endpoint) = endpoint.upgrade(Holder::Dpc) else {
                continue;
            };
            if endpoint.transition(EndpointState::Disconnected) {
                self.enqueue(RequestKind::GateWake(endpoint.gate().clone_as(Holder::Scheduler)));
            }
        }
        self.enqueue(RequestKind::ProcessStopped(process.clone_as(Holder::Scheduler)));
    }
}
