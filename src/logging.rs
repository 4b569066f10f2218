use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const MAX_LOG_SIZE: u64 = 1024 * 1024; // 1MB

/// Used when `RUST_LOG` is unset. Bridge internals (`scripting`) stay at
/// info; guest output (`script`) is always shown.
const DEFAULT_DIRECTIVES: &str = "info,scripting=info,script=trace";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Initialize logging for a component.
///
/// - `component_name`: Name of the log file, without extension
/// - `to_file`: If true, also log to a file in the data directory
///
/// Returns a guard that must be kept alive for the duration of the program.
pub fn init_logging(component_name: &str, to_file: bool) -> io::Result<Option<WorkerGuard>> {
    if !to_file {
        tracing_subscriber::fmt().with_env_filter(env_filter()).init();
        return Ok(None);
    }

    let log_dir = log_directory()?;
    fs::create_dir_all(&log_dir)?;

    let log_path = log_dir.join(format!("{}.log", component_name));
    rotate_if_needed(&log_path)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(BufWriter::new(file));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(io::stderr).with_ansi(true))
        .with(
            fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    tracing::info!("Logging to file: {}", log_path.display());
    Ok(Some(guard))
}

pub fn log_directory() -> io::Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "tickbridge")
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Failed to find home directory"))?;
    Ok(dirs.data_dir().join("logs"))
}

/// Move an oversized log aside to `<name>.log.1`, replacing any older one
fn rotate_if_needed(log_path: &Path) -> io::Result<()> {
    if !log_path.exists() || fs::metadata(log_path)?.len() <= MAX_LOG_SIZE {
        return Ok(());
    }
    let mut previous = log_path.as_os_str().to_owned();
    previous.push(".1");
    fs::rename(log_path, PathBuf::from(previous))
}
