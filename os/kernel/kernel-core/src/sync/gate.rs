use crate::object::{Arena, Holder, Ref};
use crate::sync::{Mount, Waitable, Waiter};
use crate::thread::ThreadId;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use kernel_sync::SpinLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateMode {
    /// Stays open until reset; releases every waiter.
    Latch,
    /// Each successful wait closes the gate again; releases one waiter.
    AutoReset,
}

/// Binary open/closed latch with a wait list.
///
/// Closing never releases anyone. Opening from outside the scheduler
/// ([`Gate::open_fast`]) only flips the flag; the scheduler then walks the
/// wait list on a `GateWake` request.
pub struct Gate {
    mode: GateMode,
    open: AtomicBool,
    waiters: SpinLock<VecDeque<Waiter>>,
}

impl Gate {
    pub(crate) fn create(
        arena: &Arc<Arena>,
        holder: Holder,
        mode: GateMode,
        open: bool,
    ) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |_| Self::new(mode, open))
    }

    const fn new(mode: GateMode, open: bool) -> Self {
        Self {
            mode,
            open: AtomicBool::new(open),
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub const fn mode(&self) -> GateMode {
        self.mode
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn has_waiters(&self) -> bool {
        !self.waiters.lock().is_empty()
    }

    /// Opens the gate; returns whether waiters need a scheduler pass.
    ///
    /// The flag is stored before the wait list is inspected, and mounting
    /// inspects the flag under the wait-list lock, so a concurrent mount
    /// either acquires or is seen here.
    pub(crate) fn open_fast(&self) -> bool {
        self.open.store(true, Ordering::SeqCst);
        self.has_waiters()
    }

    pub(crate) fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn consume(&self) -> bool {
        match self.mode {
            GateMode::Latch => self.open.load(Ordering::SeqCst),
            GateMode::AutoReset => self
                .open
                .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok(),
        }
    }
}

impl Waitable for Gate {
    fn acquire_or_mount(&self, waiter: Waiter) -> Mount {
        let mut waiters = self.waiters.lock();
        if self.consume() {
            Mount::Acquired
        } else {
            waiters.push_back(waiter);
            Mount::Mounted
        }
    }

    fn claim(&self, waiter: Waiter) -> bool {
        let mut waiters = self.waiters.lock();
        if !self.consume() {
            return false;
        }
        if let Some(pos) = waiters.iter().position(|w| *w == waiter) {
            waiters.remove(pos);
        }
        true
    }

    fn dismount(&self, thread: ThreadId) {
        self.waiters.lock().retain(|w| w.thread != thread);
    }

    fn waiters(&self) -> Vec<Waiter> {
        self.waiters.lock().iter().copied().collect()
    }

    fn unconsume(&self) {
        if self.mode == GateMode::AutoReset {
            self.open.store(true, Ordering::SeqCst);
        }
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("mode", &self.mode)
            .field("open", &self.is_open())
            .field("waiters", &self.waiters.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(thread: u64, entry: usize) -> Waiter {
        Waiter {
            thread: ThreadId(thread),
            entry,
        }
    }

    #[test]
    fn latch_satisfies_everyone() {
        let g = Gate::new(GateMode::Latch, false);
        assert_eq!(g.acquire_or_mount(w(1, 0)), Mount::Mounted);
        assert_eq!(g.acquire_or_mount(w(2, 0)), Mount::Mounted);
        assert!(!g.claim(w(1, 0)));
        assert!(g.open_fast());
        assert!(g.claim(w(1, 0)));
        assert!(g.claim(w(2, 0)));
        assert!(g.is_open());
        assert!(!g.has_waiters());
    }

    #[test]
    fn auto_reset_releases_one() {
        let g = Gate::new(GateMode::AutoReset, true);
        assert_eq!(g.acquire_or_mount(w(1, 0)), Mount::Acquired);
        assert!(!g.is_open());
        assert_eq!(g.acquire_or_mount(w(2, 0)), Mount::Mounted);
        g.open_fast();
        assert!(g.claim(w(2, 0)));
        assert!(!g.claim(w(3, 0)));
        g.unconsume();
        assert!(g.is_open());
    }
}
