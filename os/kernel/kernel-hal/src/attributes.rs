use bitfield_struct::bitfield;

/// Architecture-neutral attributes of a single translation.
///
/// The page-table layer turns these into whatever its entry format needs.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageAttributes {
    /// Page may be written.
    pub writable: bool,

    /// Page is accessible from user mode.
    pub user: bool,

    /// Instruction fetch is allowed.
    pub executable: bool,

    /// Translation survives address-space switches.
    pub global: bool,

    /// Caching disabled (MMIO).
    pub uncached: bool,

    #[bits(27)]
    __: u32,
}

impl PageAttributes {
    /// Read/write user data (stacks, TLS, heap).
    #[must_use]
    pub const fn user_data() -> Self {
        Self::new().with_writable(true).with_user(true)
    }

    /// Read/write kernel data.
    #[must_use]
    pub const fn kernel_data() -> Self {
        Self::new().with_writable(true).with_global(true)
    }
}
