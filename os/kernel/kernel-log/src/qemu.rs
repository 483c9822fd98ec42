use crate::LogSink;
use core::fmt::{self, Write};

const QEMU_DEBUGCON_PORT: u16 = 0x402;

/// Writes to QEMU's `-debugcon` port. Harmless no-op on real hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct QemuPortSink;

/// Write to QEMU's port.
#[allow(clippy::inline_always)]
#[inline(always)]
unsafe fn outb(port: u16, val: u8) {
    unsafe {
        core::arch::asm!(
        "out dx, al",
        in("dx") port,
        in("al") val,
        options(nomem, preserves_flags)
        );
    }
}

struct PortWriter;

impl Write for PortWriter {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            // SAFETY: port 0x402 is a write-only debug port with no side effects on the guest.
            unsafe { outb(QEMU_DEBUGCON_PORT, b) };
        }
        Ok(())
    }
}

impl LogSink for QemuPortSink {
    fn write_record(&self, line: fmt::Arguments<'_>) {
        // Best-effort debug output.
        let _ = fmt::write(&mut PortWriter, line);
    }
}
