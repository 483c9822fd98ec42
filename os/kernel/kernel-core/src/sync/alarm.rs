use crate::object::{Arena, Holder, Ref};
use crate::sched::TimerKey;
use crate::sync::{Gate, GateMode};
use alloc::sync::Arc;
use core::fmt;
use kernel_sync::SpinLock;

/// Scheduler-side timer of an alarm. Only touched by the Locked Scheduler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AlarmTimer {
    pub key: Option<TimerKey>,
    /// Re-arm interval in ticks; zero for one-shot.
    pub period: u64,
}

/// One-shot or periodic timer signalling an auto-reset gate.
pub struct Alarm {
    gate: Ref<Gate>,
    timer: SpinLock<AlarmTimer>,
}

impl Alarm {
    pub(crate) fn create(arena: &Arc<Arena>, holder: Holder) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |id| Self {
            gate: Gate::create(arena, Holder::Object(id), GateMode::AutoReset, false),
            timer: SpinLock::new(AlarmTimer::default()),
        })
    }

    #[must_use]
    pub const fn gate(&self) -> &Ref<Gate> {
        &self.gate
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.timer.lock().key.is_some()
    }

    #[must_use]
    pub fn period(&self) -> u64 {
        self.timer.lock().period
    }

    pub(crate) fn with_timer<R>(&self, f: impl FnOnce(&mut AlarmTimer) -> R) -> R {
        self.timer.with_lock(f)
    }
}

impl fmt::Debug for Alarm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alarm")
            .field("timer", &*self.timer.lock())
            .field("gate", &self.gate)
            .finish()
    }
}
