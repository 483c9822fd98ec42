use core::fmt;

/// Base page granularity in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// Virtual memory address.
///
/// Carries the *kind* of address at the type level so virtual and physical
/// values are never mixed. No canonicality checks.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

/// Physical memory address.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

macro_rules! address_impl {
    ($ty:ident, $tag:literal) => {
        impl $ty {
            #[inline]
            #[must_use]
            pub const fn new(v: u64) -> Self {
                Self(v)
            }

            #[inline]
            #[must_use]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            #[inline]
            #[must_use]
            pub const fn is_page_aligned(self) -> bool {
                self.0 % PAGE_SIZE == 0
            }

            /// Address of page `n` counted from this one.
            #[inline]
            #[must_use]
            pub const fn page_offset(self, n: u64) -> Self {
                Self(self.0 + n * PAGE_SIZE)
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($tag, "({:#018x})"), self.0)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#018x}", self.0)
            }
        }
    };
}

address_impl!(VirtualAddress, "VA");
address_impl!(PhysicalAddress, "PA");

/// A contiguous run of physical pages.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct PhysicalRange {
    pub start: PhysicalAddress,
    pub pages: usize,
}

impl PhysicalRange {
    #[must_use]
    pub const fn new(start: PhysicalAddress, pages: usize) -> Self {
        Self { start, pages }
    }

    /// Physical address of page `n` in this run.
    #[must_use]
    pub const fn page(&self, n: usize) -> PhysicalAddress {
        self.start.page_offset(n as u64)
    }

    #[must_use]
    pub const fn len_bytes(&self) -> u64 {
        self.pages as u64 * PAGE_SIZE
    }
}

/// Identifies one set of translations (one process, or the kernel).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct AddressSpaceId(pub u32);

impl AddressSpaceId {
    /// Translations shared by every core regardless of the mapped process.
    pub const KERNEL: Self = Self(0);

    #[must_use]
    pub const fn is_kernel(self) -> bool {
        self.0 == Self::KERNEL.0
    }
}
