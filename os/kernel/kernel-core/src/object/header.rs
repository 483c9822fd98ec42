use crate::object::{Arena, ObjectKind};
use crate::process::ProcessId;
use crate::thread::ThreadId;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitfield_struct::bitfield;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use kernel_hal::CoreId;
use kernel_sync::SpinLock;

/// Kernel-wide unique object number; never reused within one boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who owns a reference. Recorded for auditing only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holder {
    Kernel(&'static str),
    Thread(ThreadId),
    Process(ProcessId),
    Core(CoreId),
    /// Another object's body.
    Object(ObjectId),
    /// A token-table entry.
    Token(u32),
    /// A macro-wait entry of the thread.
    Wait(ThreadId),
    Scheduler,
    Dpc,
}

/// One live reference edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefRecord {
    pub serial: u64,
    pub holder: Holder,
}

/// Reference count and lifecycle flags, packed so readers see them together.
#[bitfield(u32)]
struct RefWord {
    #[bits(30)]
    count: u32,
    /// The count reached zero; no reference may be created anymore.
    zeroed: bool,
    /// Reaching zero does not reclaim the object.
    permanent: bool,
}

pub struct ObjectHeader {
    id: ObjectId,
    kind: ObjectKind,
    word: AtomicU32,
    tokens: AtomicU32,
    refs: SpinLock<Vec<RefRecord>>,
    next_serial: AtomicU64,
    arena: Arc<Arena>,
}

impl ObjectHeader {
    pub(crate) fn new(arena: Arc<Arena>, id: ObjectId, kind: ObjectKind, permanent: bool) -> Self {
        Self {
            id,
            kind,
            word: AtomicU32::new(RefWord::new().with_permanent(permanent).into_bits()),
            tokens: AtomicU32::new(0),
            refs: SpinLock::new(Vec::new()),
            next_serial: AtomicU64::new(1),
            arena,
        }
    }

    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    #[must_use]
    pub const fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub(crate) const fn arena(&self) -> &Arc<Arena> {
        &self.arena
    }

    fn word(&self) -> RefWord {
        RefWord::from_bits(self.word.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.word().count()
    }

    #[must_use]
    pub fn is_zeroed(&self) -> bool {
        self.word().zeroed()
    }

    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.word().permanent()
    }

    /// Number of token-table entries naming this object.
    #[must_use]
    pub fn token_count(&self) -> u32 {
        self.tokens.load(Ordering::Acquire)
    }

    pub(crate) fn add_token(&self) {
        self.tokens.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn remove_token(&self) {
        let prev = self.tokens.fetch_sub(1, Ordering::AcqRel);
        if prev == 0 {
            fatal!("token count underflow on object {}", self.id);
        }
    }

    /// Holders of every live reference, oldest first.
    #[must_use]
    pub fn holders(&self) -> Vec<Holder> {
        self.refs.lock().iter().map(|r| r.holder).collect()
    }

    /// Adds a reference edge and returns its serial.
    ///
    /// Fatal once the object has been flagged zeroed.
    pub(crate) fn acquire(&self, holder: Holder) -> u64 {
        match self.increment(holder, true) {
            Some(serial) => serial,
            None => fatal!("reference to {}#{} created after it reached zero", self.kind, self.id),
        }
    }

    /// Adds a reference edge unless the object is zeroed or, for
    /// non-permanent objects, has no live reference vouching for it.
    pub(crate) fn try_acquire(&self, holder: Holder) -> Option<u64> {
        self.increment(holder, false)
    }

    fn increment(&self, holder: Holder, allow_unreferenced: bool) -> Option<u64> {
        let mut refs = self.refs.lock();
        let mut word = self.word();
        loop {
            if word.zeroed() || (word.count() == 0 && !word.permanent() && !allow_unreferenced) {
                return None;
            }
            let next = word.with_count(word.count() + 1);
            match self.word.compare_exchange_weak(
                word.into_bits(),
                next.into_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => word = RefWord::from_bits(actual),
            }
        }
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        refs.push(RefRecord { serial, holder });
        Some(serial)
    }

    /// Removes the edge `serial`. Returns `true` exactly once per object:
    /// for the release that drops a non-permanent object to zero.
    pub(crate) fn release(&self, serial: u64) -> bool {
        let mut refs = self.refs.lock();
        let Some(pos) = refs.iter().position(|r| r.serial == serial) else {
            fatal!("release of unknown reference {serial} on {}#{}", self.kind, self.id);
        };
        refs.swap_remove(pos);

        let mut word = self.word();
        loop {
            if word.count() == 0 {
                fatal!("reference count underflow on {}#{}", self.kind, self.id);
            }
            let count = word.count() - 1;
            let zeroed = count == 0 && !word.permanent();
            let next = word.with_count(count).with_zeroed(zeroed);
            match self.word.compare_exchange_weak(
                word.into_bits(),
                next.into_bits(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if zeroed {
                        core::sync::atomic::fence(Ordering::Acquire);
                    }
                    return zeroed;
                }
                Err(actual) => word = RefWord::from_bits(actual),
            }
        }
    }

    /// Checks that the count matches the reference list.
    ///
    /// # Errors
    /// `(count, records)` on mismatch.
    pub fn audit(&self) -> Result<(), (u32, usize)> {
        let refs = self.refs.lock();
        let count = self.word().count();
        if count as usize == refs.len() {
            Ok(())
        } else {
            Err((count, refs.len()))
        }
    }
}

impl Drop for ObjectHeader {
    fn drop(&mut self) {
        self.arena.note_freed();
    }
}

impl fmt::Debug for ObjectHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.word();
        f.debug_struct("ObjectHeader")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("count", &word.count())
            .field("zeroed", &word.zeroed())
            .field("permanent", &word.permanent())
            .field("tokens", &self.token_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::arena::tests::arena;

    fn header() -> ObjectHeader {
        let arena = arena(1);
        let id = arena.allocate_id();
        ObjectHeader::new(arena, id, ObjectKind::Gate, false)
    }

    #[test]
    fn last_release_zeroes_once() {
        let h = header();
        let a = h.acquire(Holder::Kernel("a"));
        let b = h.acquire(Holder::Kernel("b"));
        assert_eq!(h.ref_count(), 2);
        assert!(!h.release(a));
        assert!(h.release(b));
        assert!(h.is_zeroed());
        assert_eq!(h.audit(), Ok(()));
    }

    #[test]
    fn try_acquire_fails_after_zero() {
        let h = header();
        let a = h.acquire(Holder::Kernel("a"));
        assert!(h.release(a));
        assert_eq!(h.try_acquire(Holder::Kernel("late")), None);
    }

    #[test]
    #[should_panic(expected = "after it reached zero")]
    fn acquire_after_zero_is_fatal() {
        let h = header();
        let a = h.acquire(Holder::Kernel("a"));
        h.release(a);
        h.acquire(Holder::Kernel("late"));
    }

    #[test]
    #[should_panic(expected = "unknown reference")]
    fn double_release_is_fatal() {
        let h = header();
        let a = h.acquire(Holder::Kernel("a"));
        let _b = h.acquire(Holder::Kernel("b"));
        h.release(a);
        h.release(a);
    }

    #[test]
    fn permanent_objects_never_zero() {
        let arena = arena(1);
        let id = arena.allocate_id();
        let h = ObjectHeader::new(arena, id, ObjectKind::Process, true);
        let a = h.acquire(Holder::Kernel("boot"));
        assert!(!h.release(a));
        assert!(!h.is_zeroed());
        assert!(h.try_acquire(Holder::Kernel("again")).is_some());
    }

    #[test]
    fn holders_are_recorded() {
        let h = header();
        let _a = h.acquire(Holder::Scheduler);
        let _b = h.acquire(Holder::Token(7));
        assert_eq!(h.holders(), vec![Holder::Scheduler, Holder::Token(7)]);
    }
}
