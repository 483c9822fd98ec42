use crate::object::{Arena, Holder, Ref, WeakRef};
use crate::sync::{Mount, Waitable, Waiter};
use crate::thread::ThreadId;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use kernel_sync::SpinLock;

struct NotifyState {
    signalled: bool,
    waiters: VecDeque<Waiter>,
}

/// One-shot signal. A signal with nobody waiting stays pending until the
/// next wait consumes it.
pub struct Notify {
    state: SpinLock<NotifyState>,
}

impl Notify {
    pub(crate) fn create(arena: &Arc<Arena>, holder: Holder) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |_| Self::new())
    }

    const fn new() -> Self {
        Self {
            state: SpinLock::new(NotifyState {
                signalled: false,
                waiters: VecDeque::new(),
            }),
        }
    }

    #[must_use]
    pub fn is_signalled(&self) -> bool {
        self.state.lock().signalled
    }

    /// Marks the notify signalled; the scheduler hands it to a waiter.
    pub(crate) fn raise(&self) {
        self.state.lock().signalled = true;
    }
}

impl Waitable for Notify {
    fn acquire_or_mount(&self, waiter: Waiter) -> Mount {
        let mut state = self.state.lock();
        if state.signalled {
            state.signalled = false;
            Mount::Acquired
        } else {
            state.waiters.push_back(waiter);
            Mount::Mounted
        }
    }

    fn claim(&self, waiter: Waiter) -> bool {
        let mut state = self.state.lock();
        if !state.signalled {
            return false;
        }
        state.signalled = false;
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
        self.state.lock().signalled = true;
    }
}

impl fmt::Debug for Notify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Notify")
            .field("signalled", &state.signalled)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

/// Signal-only capability for a notify owned elsewhere.
#[derive(Debug)]
pub struct NotifyProxy {
    target: WeakRef<Notify>,
}

impl NotifyProxy {
    pub(crate) fn create(arena: &Arc<Arena>, holder: Holder, target: &Ref<Notify>) -> Ref<Self> {
        Ref::create_with(arena, holder, false, |_| Self {
            target: target.downgrade(),
        })
    }

    /// The target, unless it has been reclaimed.
    #[must_use]
    pub fn target(&self, holder: Holder) -> Option<Ref<Notify>> {
        self.target.upgrade(holder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_without_waiter_is_kept() {
        let n = Notify::new();
        n.raise();
        let w = Waiter {
            thread: ThreadId(1),
            entry: 0,
        };
        assert_eq!(n.acquire_or_mount(w), Mount::Acquired);
        assert_eq!(n.acquire_or_mount(w), Mount::Mounted);
        n.raise();
        assert!(n.claim(w));
        assert!(!n.claim(w));
        assert!(n.waiters().is_empty());
    }
}
