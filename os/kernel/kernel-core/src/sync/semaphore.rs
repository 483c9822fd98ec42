use crate::error::SyscallError;
use crate::object::{Arena, Holder, Ref};
use crate::sync::{Mount, Waitable, Waiter};
use crate::thread::ThreadId;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_sync::SpinLock;

struct SemaphoreState {
    count: u32,
    waiters: VecDeque<Waiter>,
}

/// Counting semaphore. Releases satisfy waiters in FIFO order before they
/// accumulate on the count.
pub struct Semaphore {
    max: u32,
    state: SpinLock<SemaphoreState>,
}

impl Semaphore {
    pub(crate) fn create(
        arena: &Arc<Arena>,
        holder: Holder,
        initial: u32,
        max: u32,
    ) -> Result<Ref<Self>, SyscallError> {
        if max == 0 || initial > max {
            return Err(SyscallError::InvalidArgument);
        }
        Ok(Ref::create_with(arena, holder, false, |_| Self::new(initial, max)))
    }

    const fn new(initial: u32, max: u32) -> Self {
        Self {
            max,
            state: SpinLock::new(SemaphoreState {
                count: initial,
                waiters: VecDeque::new(),
            }),
        }
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.state.lock().count
    }

    #[must_use]
    pub const fn max(&self) -> u32 {
        self.max
    }

    /// Adds `n` to the count; the scheduler then walks the waiters.
    ///
    /// # Errors
    /// [`SyscallError::InvalidArgument`] if the count would exceed the maximum.
    pub(crate) fn add(&self, n: u32) -> Result<(), SyscallError> {
        let mut state = self.state.lock();
        let count = state
            .count
            .checked_add(n)
            .filter(|&c| c <= self.max)
            .ok_or(SyscallError::InvalidArgument)?;
        state.count = count;
        Ok(())
    }

    fn take_one(state: &mut SemaphoreState) -> bool {
        if state.count == 0 {
            return false;
        }
        state.count -= 1;
        true
    }
}

impl Waitable for Semaphore {
    fn acquire_or_mount(&self, waiter: Waiter) -> Mount {
        let mut state = self.state.lock();
        if Self::take_one(&mut state) {
            Mount::Acquired
        } else {
            state.waiters.push_back(waiter);
            Mount::Mounted
        }
    }

    fn claim(&self, waiter: Waiter) -> bool {
        let mut state = self.state.lock();
        if !Self::take_one(&mut state) {
            return false;
        }
        if let Some(pos) = state.waiters.iter().position(|w| *w == waiter) {
            state.waiters.remove(pos);
        }
        true
    }

    fn dismount(&self, thread: ThreadId) {
        self.state.lock().waiters.retain(|w| w.thread != thread);
    }

    fn waiters(&self) -> Vec<Waiter> {
        self.state.lock().waiters.iter().copied().collect()
    }

    fn unconsume(&self) {
        let mut state = self.state.lock();
        state.count = (state.count + 1).min(self.max);
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Semaphore")
            .field("count", &state.count)
            .field("max", &self.max)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Per-holder accounting of acquired counts.
///
/// Waiting through a user records each acquisition; when the user is
/// reclaimed, whatever it still holds goes back to the semaphore.
#[derive(Debug)]
pub struct SemaphoreUser {
    semaphore: Ref<Semaphore>,
    held: AtomicU32,
}

impl SemaphoreUser {
    pub(crate) fn create(
        arena: &Arc<Arena>,
        holder: Holder,
        semaphore: &Ref<Semaphore>,
    ) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |id| Self {
            semaphore: semaphore.clone_as(Holder::Object(id)),
            held: AtomicU32::new(0),
        })
    }

    #[must_use]
    pub const fn semaphore(&self) -> &Ref<Semaphore> {
        &self.semaphore
    }

    #[must_use]
    pub fn held(&self) -> u32 {
        self.held.load(Ordering::Acquire)
    }

    pub(crate) fn note_acquired(&self) {
        self.held.fetch_add(1, Ordering::AcqRel);
    }

    /// Gives back `n` counts held by this user.
    ///
    /// # Errors
    /// [`SyscallError::InvalidArgument`] if the user holds fewer than `n`.
    pub(crate) fn note_returned(&self, n: u32) -> Result<(), SyscallError> {
        self.held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |h| h.checked_sub(n))
            .map(|_| ())
            .map_err(|_| SyscallError::InvalidArgument)
    }

    /// Everything still held, zeroing the account.
    pub(crate) fn take_held(&self) -> u32 {
        self.held.swap(0, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_then_fifo() {
        let s = Semaphore::new(1, 4);
        let w1 = Waiter {
            thread: ThreadId(1),
            entry: 0,
        };
        let w2 = Waiter {
            thread: ThreadId(2),
            entry: 0,
        };
        assert_eq!(s.acquire_or_mount(w1), Mount::Acquired);
        assert_eq!(s.acquire_or_mount(w1), Mount::Mounted);
        assert_eq!(s.acquire_or_mount(w2), Mount::Mounted);
        s.add(1).unwrap();
        assert_eq!(s.waiters()[0], w1);
        assert!(s.claim(w1));
        assert!(!s.claim(w2));
        assert_eq!(s.add(5), Err(SyscallError::InvalidArgument));
    }
}
