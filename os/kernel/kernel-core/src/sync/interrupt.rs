use crate::object::{Arena, Holder, Ref};
use crate::sync::{Gate, GateMode};
use alloc::sync::Arc;
use kernel_hal::InterruptId;

/// A hardware interrupt line bound to an auto-reset gate.
///
/// Each delivery opens the gate once; a waiter consumes it. Reclaiming the
/// object masks the line.
#[derive(Debug)]
pub struct Interrupt {
    line: InterruptId,
    gate: Ref<Gate>,
}

impl Interrupt {
    pub(crate) fn create(arena: &Arc<Arena>, holder: Holder, line: InterruptId) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |id| Self {
            line,
            gate: Gate::create(arena, Holder::Object(id), GateMode::AutoReset, false),
        })
    }

    #[must_use]
    pub const fn line(&self) -> InterruptId {
        self.line
    }

    #[must_use]
    pub const fn gate(&self) -> &Ref<Gate> {
        &self.gate
    }
}
