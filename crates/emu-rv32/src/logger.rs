//! Log output plumbing.
//!
//! Backs the `log` facade with a plain line writer aimed at stdout or, with
//! `-l FILE`, at a file. Trace dumps, banners and statistics all go through
//! `log::info!`, so redirecting the log captures a complete run record;
//! debugger command output stays on stdout regardless.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

use log::{Level, LevelFilter, Metadata, Record};

struct SimLogger {
    out: Mutex<Box<dyn Write + Send>>,
}

impl log::Log for SimLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Ok(mut out) = self.out.lock() else {
            return;
        };
        let _ = match record.level() {
            Level::Info => writeln!(out, "{}", record.args()),
            level => writeln!(out, "[{}] {}", level.as_str().to_lowercase(), record.args()),
        };
        let _ = out.flush();
    }

    fn flush(&self) {
        if let Ok(mut out) = self.out.lock() {
            let _ = out.flush();
        }
    }
}

/// Install the logger, writing to `path` if given, stdout otherwise.
///
/// # Errors
///
/// Fails if the log file cannot be created or a logger is already set.
pub fn init(path: Option<&Path>) -> Result<(), String> {
    let out: Box<dyn Write + Send> = match path {
        Some(p) => Box::new(
            File::create(p).map_err(|e| format!("cannot create log file {}: {e}", p.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    log::set_boxed_logger(Box::new(SimLogger {
        out: Mutex::new(out),
    }))
    .map_err(|e| e.to_string())?;
    log::set_max_level(LevelFilter::Info);
    Ok(())
}
