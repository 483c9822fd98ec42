use crate::{SpinLock, SpinLockGuard};
use core::ops::{Deref, DerefMut};

/// Masking and unmasking of interrupts on the current core.
///
/// The kernel core never issues `cli`/`sti` itself; it goes through this
/// trait so the same code can run under a host-side mock platform.
pub trait InterruptControl {
    /// Whether the current core accepts maskable interrupts.
    fn interrupts_enabled(&self) -> bool;

    /// Masks interrupts on the current core.
    fn disable_interrupts(&self);

    /// Unmasks interrupts on the current core.
    fn enable_interrupts(&self);
}

impl<C: InterruptControl + ?Sized> InterruptControl for &C {
    #[inline]
    fn interrupts_enabled(&self) -> bool {
        (**self).interrupts_enabled()
    }

    #[inline]
    fn disable_interrupts(&self) {
        (**self).disable_interrupts();
    }

    #[inline]
    fn enable_interrupts(&self) {
        (**self).enable_interrupts();
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// The guard snapshots the interrupt-enable state. If interrupts were enabled
/// it masks them, and on drop unmasks them **only** if they were previously
/// enabled. Nested guards therefore compose.
pub struct IrqGuard<'a, C: InterruptControl + ?Sized> {
    ctl: &'a C,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<'a, C: InterruptControl + ?Sized> IrqGuard<'a, C> {
    #[inline]
    #[must_use]
    pub fn new(ctl: &'a C) -> Self {
        let enabled = ctl.interrupts_enabled();
        if enabled {
            ctl.disable_interrupts();
        }
        Self {
            ctl,
            were_enabled: enabled,
        }
    }

    /// Whether dropping this guard will re-enable interrupts.
    #[inline]
    #[must_use]
    pub const fn restores(&self) -> bool {
        self.were_enabled
    }
}

impl<C: InterruptControl + ?Sized> Drop for IrqGuard<'_, C> {
    fn drop(&mut self) {
        if self.were_enabled {
            self.ctl.enable_interrupts();
        }
    }
}

/// A spin lock guard that also keeps interrupts masked while held.
///
/// Fields drop in declaration order: the lock is released before interrupts
/// are restored, so an interrupt taken right after the restore never finds
/// the lock held by its own core.
pub struct IrqSpinLockGuard<'a, T, C: InterruptControl + ?Sized> {
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard<'a, C>,
}

impl<T> SpinLock<T> {
    /// Masks interrupts through `ctl`, then acquires the lock.
    #[inline]
    pub fn lock_irq<'a, C: InterruptControl + ?Sized>(
        &'a self,
        ctl: &'a C,
    ) -> IrqSpinLockGuard<'a, T, C> {
        let irq = IrqGuard::new(ctl);
        let guard = self.lock();
        IrqSpinLockGuard { guard, _irq: irq }
    }
}

impl<T, C: InterruptControl + ?Sized> Deref for IrqSpinLockGuard<'_, T, C> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, C: InterruptControl + ?Sized> DerefMut for IrqSpinLockGuard<'_, T, C> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Bare-metal x86-64 interrupt control via `cli`/`sti` and `RFLAGS.IF`.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod x86 {
    use super::InterruptControl;

    /// Interrupt-enable flag, bit 9 of `RFLAGS`.
    const RFLAGS_IF: u64 = 1 << 9;

    /// Zero-sized handle for the executing core's interrupt flag.
    ///
    /// # Privilege
    ///
    /// Must only be used at CPL 0 where `cli`/`sti` are permitted.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NativeInterrupts;

    /// Returns the current `RFLAGS` value (via `pushfq/pop`).
    #[inline]
    #[must_use]
    pub fn rflags() -> u64 {
        let r: u64;
        unsafe { core::arch::asm!("pushfq; pop {}", out(reg) r, options(nostack, preserves_flags)) }
        r
    }

    impl InterruptControl for NativeInterrupts {
        #[inline]
        fn interrupts_enabled(&self) -> bool {
            rflags() & RFLAGS_IF != 0
        }

        #[inline]
        fn disable_interrupts(&self) {
            unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
        }

        #[inline]
        fn enable_interrupts(&self) {
            unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
        }
    }
}
