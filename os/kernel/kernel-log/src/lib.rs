//! # Kernel logging
//!
//! A [`log::Log`] implementation that formats every record as
//! `"[LEVEL] target: message\n"` and hands it to a [`LogSink`].
//!
//! * [`QemuPortSink`] writes to QEMU's debug console port `0x402`
//!   (x86-64, `qemu` feature). Run QEMU with `-debugcon stdio` to see it.
//! * [`CaptureSink`] keeps the most recent records in memory, so host tests
//!   can assert on what the kernel reported.
//!
//! ```rust
//! use kernel_log::{CaptureSink, SinkLogger};
//! use log::LevelFilter;
//!
//! static LOGGER: SinkLogger<CaptureSink> =
//!     SinkLogger::new(LevelFilter::Debug, CaptureSink::new(128));
//!
//! LOGGER.install().ok();
//! log::info!(target: "boot", "cores online");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod capture;
mod logger;
#[cfg(all(feature = "qemu", target_arch = "x86_64"))]
mod qemu;

pub use capture::CaptureSink;
pub use logger::{LogSink, SinkLogger};
#[cfg(all(feature = "qemu", target_arch = "x86_64"))]
pub use qemu::QemuPortSink;
