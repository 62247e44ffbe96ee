// Session log files with rotation, fed by the tracing subscriber.
// Every process run gets its own `<app>_<timestamp>.log`; older files beyond
// the retention count are removed at startup.
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Buffered bytes are written out once they pass this size.
const FLUSH_THRESHOLD: usize = 64 * 1024;

pub struct SessionLogger {
    log_buffer: Mutex<Vec<u8>>,
    log_path: PathBuf,
    log_dir: PathBuf,
    retention_count: usize,
    app_name: String,
}

impl SessionLogger {
    pub fn new(log_dir: PathBuf, app_name: &str, retention_count: usize) -> Result<Self> {
        fs::create_dir_all(&log_dir)
            .context("Failed to create logs directory")?;

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_path = log_dir.join(format!("{}_{}.log", app_name, timestamp));

        let logger = Self {
            log_buffer: Mutex::new(Vec::new()),
            log_path,
            log_dir,
            retention_count,
            app_name: app_name.to_string(),
        };

        logger.clean_old_logs();
        logger.write_marker("Session Started");

        Ok(logger)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn write_marker(&self, what: &str) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!("[{}] === {} {} ===\n", timestamp, self.app_name, what);
        self.log_buffer.lock().extend_from_slice(line.as_bytes());
    }

    fn append(&self, bytes: &[u8]) -> io::Result<()> {
        let full = {
            let mut buffer = self.log_buffer.lock();
            buffer.extend_from_slice(bytes);
            buffer.len() >= FLUSH_THRESHOLD
        };

        if full {
            self.flush_to_disk()?;
        }
        Ok(())
    }

    fn clean_old_logs(&self) {
        let prefix = format!("{}_", self.app_name);
        let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();

        if let Ok(entries) = fs::read_dir(&self.log_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let is_ours = path.extension().and_then(|s| s.to_str()) == Some("log")
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix));
                if !is_ours {
                    continue;
                }
                if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                    log_files.push((path, modified));
                }
            }
        }

        // Newest first; this session's file does not exist yet, so keep one slot for it.
        log_files.sort_by(|a, b| b.1.cmp(&a.1));
        let keep = self.retention_count.saturating_sub(1);
        for (path, _) in log_files.iter().skip(keep) {
            let _ = fs::remove_file(path);
        }
    }

    pub fn flush_to_disk(&self) -> io::Result<()> {
        let mut buffer = self.log_buffer.lock();
        if buffer.is_empty() {
            return Ok(());
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        file.write_all(&buffer)?;
        file.flush()?;

        buffer.clear();
        Ok(())
    }

    pub fn finalize(&self) -> io::Result<()> {
        self.write_marker("Session Ended");
        self.flush_to_disk()
    }
}

/// `io::Write` handle handed to the fmt layer for each event.
pub struct SessionWriter {
    logger: Arc<SessionLogger>,
}

impl Write for SessionWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.logger.append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

static LOGGER: once_cell::sync::OnceCell<Arc<SessionLogger>> = once_cell::sync::OnceCell::new();

/// Install the global subscriber: stderr plus the rotating session file.
///
/// `filter` uses `EnvFilter` syntax; `RUST_LOG` wins when set.
pub fn init_logger(log_dir: PathBuf, app_name: &str, retention_count: usize, filter: &str) -> Result<()> {
    let logger = Arc::new(SessionLogger::new(log_dir, app_name, retention_count)?);
    LOGGER
        .set(logger.clone())
        .map_err(|_| anyhow::anyhow!("Logger already initialized"))?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .context("Invalid log filter")?;

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_thread_ids(true)
        .with_writer(move || SessionWriter { logger: logger.clone() });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

pub fn finalize_logs() -> Result<()> {
    if let Some(logger) = LOGGER.get() {
        logger.finalize().context("Failed to flush session log")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "capture-preview-logs-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn buffered_lines_reach_disk_on_finalize() {
        let dir = scratch_dir("finalize");
        let logger = Arc::new(SessionLogger::new(dir.clone(), "relay", 5).unwrap());

        let mut writer = SessionWriter { logger: logger.clone() };
        writer.write_all(b"resized to 1024x768\n").unwrap();
        assert!(!logger.log_path().exists());

        logger.finalize().unwrap();
        let content = fs::read_to_string(logger.log_path()).unwrap();
        assert!(content.contains("=== relay Session Started ==="));
        assert!(content.contains("resized to 1024x768"));
        assert!(content.contains("=== relay Session Ended ==="));

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn large_buffers_flush_early() {
        let dir = scratch_dir("threshold");
        let logger = Arc::new(SessionLogger::new(dir.clone(), "relay", 5).unwrap());

        let mut writer = SessionWriter { logger: logger.clone() };
        writer.write_all(&vec![b'x'; FLUSH_THRESHOLD]).unwrap();

        assert!(logger.log_path().exists());
        assert!(logger.log_buffer.lock().is_empty());

        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn retention_keeps_newest_files_for_this_app() {
        let dir = scratch_dir("retention");
        for i in 0..5 {
            fs::write(dir.join(format!("relay_2025010{}_000000.log", i)), "old").unwrap();
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        fs::write(dir.join("other_20250101_000000.log"), "keep").unwrap();

        let _logger = SessionLogger::new(dir.clone(), "relay", 3).unwrap();

        let mut remaining: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        remaining.sort();

        assert_eq!(
            remaining,
            vec![
                "other_20250101_000000.log".to_string(),
                "relay_20250103_000000.log".to_string(),
                "relay_20250104_000000.log".to_string(),
            ]
        );

        let _ = fs::remove_dir_all(dir);
    }
}
