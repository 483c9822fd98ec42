use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

/// Handle of one queued timer; unique for the lifetime of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerKey(u64);

struct TimerEntry<T> {
    /// Ticks after the previous entry (or after `base` for the first).
    delta: u64,
    key: TimerKey,
    item: T,
}

/// Sorted, delta-encoded timer list.
///
/// Each entry stores its distance to the entry in front of it, so expiry
/// only ever looks at the head. Entries with equal deadlines fire in
/// insertion order.
pub struct TimerQueue<T> {
    base: u64,
    entries: VecDeque<TimerEntry<T>>,
    next_key: u64,
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimerQueue<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            base: 0,
            entries: VecDeque::new(),
            next_key: 1,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Queues `item` to fire at `deadline`. A deadline before the last expiry
    /// fires on the next [`expire`](Self::expire).
    pub fn insert(&mut self, deadline: u64, item: T) -> TimerKey {
        let key = TimerKey(self.next_key);
        self.next_key += 1;

        let deadline = deadline.max(self.base);

        let mut at = self.base;
        let mut index = self.entries.len();
        for (i, entry) in self.entries.iter().enumerate() {
            if at + entry.delta > deadline {
                index = i;
                break;
            }
            at += entry.delta;
        }

        let delta = deadline - at;
        if let Some(next) = self.entries.get_mut(index) {
            next.delta -= delta;
        }
        self.entries.insert(index, TimerEntry { delta, key, item });
        key
    }

    /// Removes a queued timer; `None` if it already fired or was cancelled.
    pub fn cancel(&mut self, key: TimerKey) -> Option<T> {
        let index = self.entries.iter().position(|e| e.key == key)?;
        let entry = self.entries.remove(index)?;
        if let Some(next) = self.entries.get_mut(index) {
            next.delta += entry.delta;
        }
        Some(entry.item)
    }

    /// Pops every entry due at `now`, earliest first, with its deadline.
    pub fn expire(&mut self, now: u64) -> Vec<(u64, T)> {
        let mut fired = Vec::new();
        while let Some(head) = self.entries.front() {
            let deadline = self.base + head.delta;
            if deadline > now {
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                self.base = deadline;
                fired.push((deadline, entry.item));
            }
        }
        fired
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.front().map(|e| self.base + e.delta)
    }

    /// Absolute deadlines in queue order.
    #[must_use]
    pub fn deadlines(&self) -> Vec<u64> {
        let mut at = self.base;
        self.entries
            .iter()
            .map(|e| {
                at += e.delta;
                at
            })
            .collect()
    }

    /// Whether the key is still queued.
    #[must_use]
    pub fn contains(&self, key: TimerKey) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TimerKey, &T)> {
        self.entries.iter().map(|e| (e.key, &e.item))
    }
}

impl<T> fmt::Debug for TimerQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerQueue")
            .field("base", &self.base)
            .field("deadlines", &self.deadlines())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_folds_delta_into_successor() {
        let mut q = TimerQueue::new();
        let _a = q.insert(10, 'a');
        let b = q.insert(20, 'b');
        let _c = q.insert(35, 'c');
        assert_eq!(q.cancel(b), Some('b'));
        assert_eq!(q.deadlines(), vec![10, 35]);
        assert_eq!(q.cancel(b), None);
    }

    #[test]
    fn expires_in_deadline_order() {
        let mut q = TimerQueue::new();
        for (deadline, item) in [(30, 'c'), (10, 'a'), (40, 'd'), (20, 'b')] {
            q.insert(deadline, item);
        }
        assert_eq!(q.deadlines(), vec![10, 20, 30, 40]);
        assert_eq!(q.expire(25), vec![(10, 'a'), (20, 'b')]);
        assert_eq!(q.next_deadline(), Some(30));
        assert_eq!(q.expire(100), vec![(30, 'c'), (40, 'd')]);
        assert!(q.is_empty());
    }

    #[test]
    fn equal_deadlines_fire_in_insertion_order() {
        let mut q = TimerQueue::new();
        q.insert(10, 1);
        q.insert(5, 0);
        q.insert(10, 2);
        let c = q.insert(10, 3);
        q.insert(10, 4);
        assert_eq!(q.cancel(c), Some(3));
        let fired: Vec<i32> = q.expire(10).into_iter().map(|(_, i)| i).collect();
        assert_eq!(fired, vec![0, 1, 2, 4]);
    }

    #[test]
    fn cancelling_the_head_keeps_later_deadlines() {
        let mut q = TimerQueue::new();
        let a = q.insert(10, 'a');
        let b = q.insert(15, 'b');
        assert_eq!(q.cancel(a), Some('a'));
        assert!(q.contains(b));
        assert_eq!(q.next_deadline(), Some(15));
        assert!(q.expire(14).is_empty());
        assert_eq!(q.expire(15), vec![(15, 'b')]);
        assert!(!q.contains(b));
    }

    #[test]
    fn late_insert_fires_next() {
        let mut q = TimerQueue::new();
        q.insert(50, 1);
        assert_eq!(q.expire(50), vec![(50, 1)]);
        q.insert(10, 2);
        assert_eq!(q.next_deadline(), Some(50));
        assert_eq!(q.expire(50), vec![(50, 2)]);
    }
}
