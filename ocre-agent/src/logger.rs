//! Logger bring-up, ported from the teacher repo's `user-agent/src/logger.rs`
//! line format: timestamp, level, `file:line`, thread name, message. The
//! thread name column is what makes this worth keeping verbatim here — with
//! a fixed dispatch worker pool, "which thread logged this" already answers
//! "which worker handled this event" without extra fields.

use flexi_logger::{DeferredNow, Logger, LoggerHandle, Record, WriteMode};

/// Starts the logger and returns its handle. The caller must keep the handle
/// alive for as long as logging is needed — dropping it tears the logger
/// down, matching `flexi_logger`'s own lifetime contract.
pub fn init_logger(level: &str) -> Result<LoggerHandle, flexi_logger::FlexiLoggerError> {
    Logger::try_with_str(level)?
        .format(log_format)
        .write_mode(WriteMode::BufferAndFlush)
        .start()
}

fn log_format(
    w: &mut dyn std::io::Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    let thread = std::thread::current();
    write!(
        w,
        "[{}] {:<5} {}:{} [{}] {}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.file().unwrap_or("<unknown>"),
        record.line().unwrap_or(0),
        thread.name().unwrap_or("unnamed"),
        &record.args()
    )
}
