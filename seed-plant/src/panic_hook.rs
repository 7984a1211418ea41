//! Panic reporting for unattended runs.

use chrono::Local;
use std::{
    backtrace::Backtrace,
    fmt,
    fs::OpenOptions,
    io::Write,
    panic::{PanicHookInfo, take_hook},
    path::{Path, PathBuf},
    thread,
};

use crate::logging::LOG_FILE_PREFIX;

/// Route panics through `tracing`.
///
/// With a log directory and a `panic = "abort"` build, the record is also
/// appended straight to today's log file, since the non-blocking writer will
/// not get a chance to flush before the abort.
pub fn install(log_dir: Option<&Path>) {
    let log_dir = log_dir.map(Path::to_path_buf);
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let panic_record = PanicRecord::capture(panic_info).to_string();

            tracing::error!(target: "seed_plant::panic", "{panic_record}");

            if cfg!(panic = "abort") {
                if let Some(dir) = &log_dir {
                    let _ = append_panic_record(dir, &panic_record);
                }
            }
        }));

        previous_hook(panic_info);
    }));
}

/// Today's file as named by `tracing_appender::rolling::daily`.
fn current_log_file(log_dir: &Path) -> PathBuf {
    log_dir.join(format!(
        "{}.{}",
        LOG_FILE_PREFIX,
        Local::now().format("%Y-%m-%d")
    ))
}

fn append_panic_record(log_dir: &Path, record: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(current_log_file(log_dir))?;
    writeln!(file, "{record}")?;
    file.flush()
}

/// One panic, as written to the log.
struct PanicRecord {
    thread: String,
    location: String,
    message: String,
    backtrace: Backtrace,
}

impl PanicRecord {
    fn capture(panic_info: &PanicHookInfo<'_>) -> Self {
        let payload = panic_info.payload();
        Self {
            thread: thread::current().name().unwrap_or("<unnamed>").to_string(),
            location: panic_info
                .location()
                .map_or_else(|| "<unknown>".to_string(), |loc| loc.to_string()),
            message: payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| panic_info.to_string()),
            backtrace: Backtrace::force_capture(),
        }
    }
}

impl fmt::Display for PanicRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} PANIC thread={} location={} message={}\nBacktrace:\n{}",
            Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"),
            self.thread,
            self.location,
            self.message,
            self.backtrace
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_panic_record_uses_daily_name() {
        let temp_dir = TempDir::new().unwrap();
        append_panic_record(temp_dir.path(), "PANIC test").unwrap();

        let path = current_log_file(temp_dir.path());
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("seed-plant.log."));
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("PANIC test"));
    }

    #[test]
    fn test_record_rendering() {
        let record = PanicRecord {
            thread: "worker".to_string(),
            location: "src/runner.rs:10:5".to_string(),
            message: "queue poisoned".to_string(),
            backtrace: Backtrace::disabled(),
        };
        let text = record.to_string();
        assert!(text.contains(" PANIC thread=worker location=src/runner.rs:10:5 message=queue poisoned\n"));
        assert!(text.contains("Backtrace:"));
    }
}
