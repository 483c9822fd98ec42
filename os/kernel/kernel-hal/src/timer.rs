use crate::CoreId;

/// Global monotonic tick source plus one deadline per core.
pub trait HighFrequencyTimer {
    /// Current tick, identical on every core.
    fn read_tick(&self) -> u64;

    /// Raises the timer vector on `core` once `delta` ticks from now have
    /// passed. Replaces any earlier deadline.
    fn arm(&self, core: CoreId, delta: u64);

    /// Cancels the pending deadline of `core`, if any.
    fn disarm(&self, core: CoreId);
}
