use core::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($(#[$doc:meta])* $name:ident),+ $(,)?) => {
        /// Monotonic per-core event counters.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct CpuStats {
            $($(#[$doc])* pub $name: u64),+
        }

        #[derive(Debug, Default)]
        pub(crate) struct Counters {
            $(pub $name: AtomicU64),+
        }

        impl Counters {
            pub(crate) fn snapshot(&self) -> CpuStats {
                CpuStats {
                    $($name: self.$name.load(Ordering::Relaxed)),+
                }
            }
        }
    };
}

counters! {
    /// Monitor entries.
    passes,
    /// Threads handed the core.
    resumes,
    idles,
    dpcs,
    /// Epochs started (run list refilled from ran and migrated).
    epochs,
    xci_sent,
    xci_received,
    /// Sends refused because the receiver still held our last message.
    xci_busy,
    xci_retries,
    /// Speculative mailbox closes that raced with a sender.
    mailbox_races,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}
