use flexi_logger::{DeferredNow, FileSpec, Logger, LoggerHandle, WriteMode};
use log::Record;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, OnceLock};

static LOGGER_HANDLE: OnceLock<Mutex<LoggerHandle>> = OnceLock::new();

/// Install the global logger.
///
/// `level` accepts any `flexi_logger` filter string (`info`, `dupewatch=debug`).
/// `RUST_LOG` overrides it when set. With `log_file` the output goes to that
/// file instead of stderr.
pub fn init_logging(
    level: &str,
    log_file: Option<&Path>,
) -> Result<(), flexi_logger::FlexiLoggerError> {
    let mut logger = Logger::try_with_env_or_str(level)?.format(line_format);

    if let Some(path) = log_file {
        logger = logger
            .log_to_file(FileSpec::try_from(path)?)
            .write_mode(WriteMode::BufferAndFlush);
    }

    let handle = logger.start()?;
    let _ = LOGGER_HANDLE.set(Mutex::new(handle));
    Ok(())
}

/// Flush buffered file output. Call before exiting.
pub fn flush() {
    if let Some(Ok(handle)) = LOGGER_HANDLE.get().map(|h| h.lock()) {
        handle.flush();
    }
}

fn line_format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    write!(
        w,
        "{} [{}] {}: {}",
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
        record.level(),
        record.module_path().unwrap_or("<unnamed>"),
        record.args()
    )
}
