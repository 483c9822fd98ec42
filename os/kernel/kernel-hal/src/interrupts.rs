use crate::{CoreId, CoreMask};

/// Hardware interrupt line or vector number.
pub type InterruptId = u32;

/// Vector carrying cross-core interrupts.
pub const XCI_VECTOR: InterruptId = 0xF0;

/// Vector of each core's one-shot deadline timer.
pub const TIMER_VECTOR: InterruptId = 0xF1;

/// Interrupt controller as seen from one core.
pub trait InterruptController {
    /// Claims the highest-priority pending interrupt on `core`.
    fn ack(&self, core: CoreId) -> Option<InterruptId>;

    /// Signals completion of `id` on `core`.
    fn end_of_interrupt(&self, core: CoreId, id: InterruptId);

    /// Unmasks or masks a device line.
    fn set_enable(&self, id: InterruptId, enabled: bool);

    /// Raises `vector` on every core in `targets`.
    fn send_directed_interrupt(&self, targets: CoreMask, vector: InterruptId);
}
