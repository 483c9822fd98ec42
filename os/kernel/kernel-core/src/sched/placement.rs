use crate::kernel::Kernel;
use crate::object::{Holder, Ref};
use crate::sched::Dispatcher;
use crate::thread::{Thread, ThreadEvent};
use crate::xci::Xci;
use kernel_hal::{CoreId, CoreMask, Platform};

/// Whether a thread should stay on its last core given the loads of that core
/// and of the least loaded eligible one.
#[must_use]
pub(crate) const fn prefers_last_core(last: usize, least: usize, hysteresis_percent: u32) -> bool {
    last <= least || last * 100 < least * (100 + hysteresis_percent as usize)
}

impl<P: Platform> Kernel<P> {
    /// Cores that still run threads.
    pub(crate) fn online_cores(&self) -> CoreMask {
        self.cores
            .iter()
            .filter(|cpu| !cpu.is_halted())
            .map(|cpu| cpu.id())
            .collect()
    }

    /// Picks the core a runnable thread goes to.
    ///
    /// Least loaded eligible core, lowest index on ties, unless the last core
    /// is within the hysteresis margin of it.
    pub(crate) fn choose_core(&self, thread: &Thread) -> CoreId {
        let online = self.online_cores();
        let mut eligible = thread.affinity().intersect(online);
        if eligible.is_empty() {
            eligible = online;
        }
        let load = |core: CoreId| self.cores[core.index()].load();
        let Some(least) = eligible.iter().min_by_key(|&core| load(core)) else {
            return self.config.scheduling_core;
        };
        match thread.last_core() {
            Some(last)
                if eligible.contains(last)
                    && prefers_last_core(
                        load(last),
                        load(least),
                        self.config.migration_hysteresis_percent,
                    ) =>
            {
                last
            }
            _ => least,
        }
    }
}

impl<P: Platform> Dispatcher<'_, P> {
    /// Hands a thread in `InScheduler` to a core.
    pub(crate) fn make_thread_run(&mut self, thread: Ref<Thread>) {
        if thread.is_abort_requested() {
            self.exit_aborted(thread);
            return;
        }
        let target = self.kernel.choose_core(&thread);
        thread.apply(ThreadEvent::Place);
        thread.set_last_core(target);

        let cpu = &self.kernel.cores[target.index()];
        cpu.note_placed();
        log::trace!(target: "kernel::sched", "{} placed on {target:?}", thread.id());
        cpu.migrating.push(thread.clone_as(Holder::Core(target)));
        drop(thread);

        if target != self.core && cpu.is_idle() {
            self.kernel.post_xci(self.core, target, Xci::Wake);
        }
    }
}
