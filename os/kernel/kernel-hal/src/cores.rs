use core::fmt;

/// Upper bound on cores; a [`CoreMask`] is one `u64`.
pub const MAX_CORES: usize = 64;

/// Logical CPU index (`0..n`).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CoreId(pub u32);

impl CoreId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core#{}", self.0)
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Set of cores, one bit per [`CoreId`].
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct CoreMask(u64);

impl CoreMask {
    pub const EMPTY: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn single(core: CoreId) -> Self {
        Self(1 << core.0)
    }

    /// The first `n` cores.
    #[inline]
    #[must_use]
    pub const fn first(n: usize) -> Self {
        if n >= MAX_CORES {
            Self(u64::MAX)
        } else {
            Self((1 << n) - 1)
        }
    }

    #[inline]
    #[must_use]
    pub const fn contains(self, core: CoreId) -> bool {
        (core.index() < MAX_CORES) && (self.0 & (1 << core.0)) != 0
    }

    #[inline]
    pub const fn insert(&mut self, core: CoreId) {
        self.0 |= 1 << core.0;
    }

    #[inline]
    pub const fn remove(&mut self, core: CoreId) {
        self.0 &= !(1 << core.0);
    }

    #[inline]
    #[must_use]
    pub const fn without(self, core: CoreId) -> Self {
        Self(self.0 & !(1 << core.0))
    }

    #[inline]
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    #[must_use]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }

    #[must_use]
    pub const fn iter(self) -> CoreMaskIter {
        CoreMaskIter(self.0)
    }
}

impl fmt::Debug for CoreMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CoreMask({:#b})", self.0)
    }
}

impl FromIterator<CoreId> for CoreMask {
    fn from_iter<I: IntoIterator<Item = CoreId>>(iter: I) -> Self {
        let mut m = Self::EMPTY;
        for c in iter {
            m.insert(c);
        }
        m
    }
}

impl IntoIterator for CoreMask {
    type Item = CoreId;
    type IntoIter = CoreMaskIter;

    fn into_iter(self) -> CoreMaskIter {
        self.iter()
    }
}

/// Ascending iterator over the cores in a mask.
pub struct CoreMaskIter(u64);

impl Iterator for CoreMaskIter {
    type Item = CoreId;

    fn next(&mut self) -> Option<CoreId> {
        if self.0 == 0 {
            return None;
        }
        let bit = self.0.trailing_zeros();
        self.0 &= self.0 - 1;
        Some(CoreId(bit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterates_ascending() {
        let m: CoreMask = [CoreId(5), CoreId(0), CoreId(63)].into_iter().collect();
        let v: Vec<_> = m.iter().collect();
        assert_eq!(v, vec![CoreId(0), CoreId(5), CoreId(63)]);
        assert_eq!(m.count(), 3);
    }

    #[test]
    fn first_n_and_without() {
        let m = CoreMask::first(4);
        assert_eq!(m.bits(), 0b1111);
        assert!(!m.without(CoreId(2)).contains(CoreId(2)));
        assert_eq!(CoreMask::first(64).count(), 64);
        assert!(CoreMask::first(0).is_empty());
    }
}
