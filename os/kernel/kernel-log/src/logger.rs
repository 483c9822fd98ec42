use core::fmt;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Destination for fully formatted log lines.
pub trait LogSink: Send + Sync {
    /// Emits one record. Best effort; a sink never fails the caller.
    fn write_record(&self, line: fmt::Arguments<'_>);
}

pub struct SinkLogger<S> {
    max_level: LevelFilter,
    sink: S,
}

impl<S: LogSink> SinkLogger<S> {
    #[must_use]
    pub const fn new(max_level: LevelFilter, sink: S) -> Self {
        Self { max_level, sink }
    }

    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Registers this logger with the `log` facade. Call once during early init.
    ///
    /// # Errors
    /// Fails if another logger was installed first.
    pub fn install(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

impl<S: LogSink> Log for SinkLogger<S> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format: "[LEVEL] target: message\n"
        self.sink.write_record(format_args!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {}
}
