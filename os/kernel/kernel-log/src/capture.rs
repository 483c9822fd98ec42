use crate::LogSink;
use alloc::{collections::VecDeque, string::String, vec::Vec};
use core::fmt;
use kernel_sync::SpinLock;

/// Bounded in-memory sink; the oldest line is dropped once `capacity` is reached.
pub struct CaptureSink {
    capacity: usize,
    lines: SpinLock<VecDeque<String>>,
}

impl CaptureSink {
    #[must_use]
    pub const fn new(capacity: usize) -> Self {
        Self {
            capacity,
            lines: SpinLock::new(VecDeque::new()),
        }
    }

    /// Snapshot of the retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.with_lock(|l| l.iter().cloned().collect())
    }

    /// Whether any retained line contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.with_lock(|l| l.iter().any(|line| line.contains(needle)))
    }

    pub fn clear(&self) {
        self.lines.with_lock(VecDeque::clear);
    }
}

impl LogSink for CaptureSink {
    fn write_record(&self, line: fmt::Arguments<'_>) {
        if self.capacity == 0 {
            return;
        }
        let line = alloc::fmt::format(line);
        self.lines.with_lock(|l| {
            while l.len() >= self.capacity {
                l.pop_front();
            }
            l.push_back(line);
        });
    }
}
