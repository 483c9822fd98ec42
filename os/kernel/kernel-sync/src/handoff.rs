use core::{
    cell::UnsafeCell,
    fmt,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const FULL: u8 = 2;
const READING: u8 = 3;

/// Single-value mailbox between exactly one producer and one consumer.
///
/// At most one value is outstanding. A producer that finds the slot occupied
/// gets its value back and decides itself whether to retry later; the slot
/// never queues.
///
/// State machine: `EMPTY -> WRITING -> FULL -> READING -> EMPTY`. Both the
/// writer and the reader claim the slot with a compare-exchange, so a racing
/// second producer or consumer is rejected instead of corrupting the value.
pub struct HandoffSlot<T> {
    state: AtomicU8,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// The slot still holds an unconsumed value.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HandoffError<T> {
    #[error("handoff slot is occupied")]
    Occupied(T),
}

impl<T> HandoffError<T> {
    /// Recovers the value that could not be posted.
    pub fn into_inner(self) -> T {
        match self {
            Self::Occupied(v) => v,
        }
    }
}

impl<T> Default for HandoffSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandoffSlot<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// Posts `value` if the slot is empty.
    ///
    /// # Errors
    /// Returns [`HandoffError::Occupied`] with the value if a previous post
    /// has not been taken yet.
    pub fn try_post(&self, value: T) -> Result<(), HandoffError<T>> {
        if self
            .state
            .compare_exchange(EMPTY, WRITING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(HandoffError::Occupied(value));
        }

        // SAFETY: WRITING grants exclusive access to the cell.
        unsafe {
            (*self.value.get()).write(value);
        }

        // Publish value before marking FULL.
        self.state.store(FULL, Ordering::Release);
        Ok(())
    }

    /// Takes the posted value, leaving the slot empty.
    pub fn take(&self) -> Option<T> {
        if self
            .state
            .compare_exchange(FULL, READING, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }

        // SAFETY: READING grants exclusive access; FULL guarantees the write is done.
        let v = unsafe { (*self.value.get()).assume_init_read() };
        self.state.store(EMPTY, Ordering::Release);
        Some(v)
    }

    /// Whether a value is waiting to be taken.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.state.load(Ordering::Acquire) == FULL
    }
}

impl<T> Drop for HandoffSlot<T> {
    fn drop(&mut self) {
        if *self.state.get_mut() == FULL {
            // SAFETY: FULL and &mut self; nobody else can observe the value.
            unsafe { self.value.get_mut().assume_init_drop() };
        }
    }
}

impl<T> fmt::Debug for HandoffSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state.load(Ordering::Relaxed) {
            EMPTY => "empty",
            WRITING => "writing",
            FULL => "full",
            _ => "reading",
        };
        f.debug_struct("HandoffSlot").field("state", &state).finish()
    }
}

// Safety: the value moves between cores but is never shared by reference.
unsafe impl<T: Send> Sync for HandoffSlot<T> {}
unsafe impl<T: Send> Send for HandoffSlot<T> {}
