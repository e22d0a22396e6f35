use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use modweave_config::ProjectPaths;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const MAX_LOG_SIZE: u64 = 1024 * 1024; // 1MB

/// Initialize logging for a component.
///
/// - `component_name`: Name of the log file without extension (e.g., "cli")
/// - `to_file`: If true, also log to `<data dir>/logs/<component_name>.log`
/// - `default_level`: Filter used when `RUST_LOG` is not set
///
/// Returns a guard that must be kept alive for the duration of the program.
pub fn init_logging(
    component_name: &str,
    to_file: bool,
    default_level: &str,
) -> io::Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if !to_file {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return Ok(None);
    }

    let log_dir = get_log_directory()?;
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join(format!("{}.log", component_name));

    truncate_if_needed(&log_path)?;

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(BufWriter::new(file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stdout).with_ansi(true))
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

fn get_log_directory() -> io::Result<PathBuf> {
    ProjectPaths::resolve()
        .map(|paths| paths.logs_dir())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Failed to find home directory"))
}

/// Start over once the log passes MAX_LOG_SIZE.
fn truncate_if_needed(log_path: &Path) -> io::Result<bool> {
    if !log_path.exists() {
        return Ok(false);
    }
    if fs::metadata(log_path)?.len() <= MAX_LOG_SIZE {
        return Ok(false);
    }
    File::create(log_path)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_truncates_only_large_logs() {
        let dir = TempDir::new().unwrap();
        let small = dir.path().join("small.log");
        let large = dir.path().join("large.log");
        fs::write(&small, "hello").unwrap();
        fs::write(&large, vec![b'x'; (MAX_LOG_SIZE + 1) as usize]).unwrap();

        assert!(!truncate_if_needed(&small).unwrap());
        assert!(truncate_if_needed(&large).unwrap());
        assert!(!truncate_if_needed(&dir.path().join("missing.log")).unwrap());

        assert_eq!(fs::metadata(&small).unwrap().len(), 5);
        assert_eq!(fs::metadata(&large).unwrap().len(), 0);
    }
}
