use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const LOG_PREFIX: &str = "stream_consumer_";

/// Log files kept after pruning, including the one just opened.
pub const KEPT_LOG_FILES: usize = 3;

/// Installs stdout + file logging and returns the path of the new log file.
///
/// HTTP client internals are capped at `warn` so a `debug` run shows the
/// stream engine rather than connection pool chatter.
pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<PathBuf> {
    fs::create_dir_all(log_dir).with_context(|| format!("cannot create log directory {}", log_dir.display()))?;

    let log_path = log_dir.join(format!(
        "{}{}.log",
        LOG_PREFIX,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    ));
    let level = parse_level(log_level);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {:<5} [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(level)
        .level_for("reqwest", level.min(log::LevelFilter::Warn))
        .level_for("hyper_util", level.min(log::LevelFilter::Warn))
        .chain(std::io::stdout())
        .chain(fern::log_file(&log_path)?)
        .apply()?;

    let removed = prune_logs(log_dir, KEPT_LOG_FILES)?;
    if removed > 0 {
        log::debug!("Pruned {} old log file(s) from {}", removed, log_dir.display());
    }
    Ok(log_path)
}

/// Accepts any `log` level name; `fatal` maps to `error`, anything unknown to `info`.
fn parse_level(log_level: &str) -> log::LevelFilter {
    if log_level.eq_ignore_ascii_case("fatal") {
        return log::LevelFilter::Error;
    }
    log::LevelFilter::from_str(log_level).unwrap_or(log::LevelFilter::Info)
}

/// Deletes all but the `keep` newest consumer logs. Other files are left alone.
///
/// File names embed a sortable timestamp, so name order is age order.
fn prune_logs(log_dir: &Path, keep: usize) -> Result<usize> {
    let mut logs: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "log")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(LOG_PREFIX))
        })
        .collect();
    logs.sort();

    let excess = logs.len().saturating_sub(keep);
    let mut removed = 0;
    for path in logs.iter().take(excess) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}
