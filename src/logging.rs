use std::{
    fs::{File, OpenOptions},
    io::{LineWriter, Write},
    path::Path,
    sync::Mutex,
};

use anyhow::{Context, Result};
use log::{LevelFilter, Log, Metadata, Record};
use simple_logger::SimpleLogger;
use time::{macros::format_description, OffsetDateTime};

pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_uppercase().as_str() {
        "TRACE" => LevelFilter::Trace,
        "DEBUG" => LevelFilter::Debug,
        "INFO" => LevelFilter::Info,
        "WARN" | "WARNING" => LevelFilter::Warn,
        "ERROR" | "CRITICAL" => LevelFilter::Error,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to INFO.", level);
            LevelFilter::Info
        }
    }
}

fn console_logger(level: LevelFilter) -> SimpleLogger {
    SimpleLogger::new()
        .with_level(level)
        .with_timestamp_format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
}

/// Console logging, additionally appended to `log_file` when given.
pub fn init_logger(level: &str, log_file: Option<&Path>) -> Result<()> {
    let level = parse_level(level);
    let console = console_logger(level);
    match log_file {
        None => console.init()?,
        Some(path) => {
            let logger = FileTeeLogger::open(console, path, level)?;
            log::set_boxed_logger(Box::new(logger))?;
            log::set_max_level(level);
        }
    }
    Ok(())
}

fn format_line(record: &Record) -> String {
    let timestamp = OffsetDateTime::now_utc()
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_default();
    format!(
        "{} {:<5} [{}] {}",
        timestamp,
        record.level(),
        record.target(),
        record.args()
    )
}

/// Writes every record to the console logger and appends it to a file.
struct FileTeeLogger {
    console: SimpleLogger,
    file: Mutex<LineWriter<File>>,
    level: LevelFilter,
}

impl FileTeeLogger {
    fn open(console: SimpleLogger, path: &Path, level: LevelFilter) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        Ok(FileTeeLogger {
            console,
            file: Mutex::new(LineWriter::new(file)),
            level,
        })
    }
}

impl Log for FileTeeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.console.log(record);
        if let Ok(mut file) = self.file.lock() {
            if let Err(e) = writeln!(file, "{}", format_line(record)) {
                eprintln!("Failed to write to log file: {}", e);
            }
        }
    }

    fn flush(&self) {
        self.console.flush();
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;
    use std::fs;

    #[test]
    fn parses_levels_case_insensitively() {
        assert_eq!(parse_level("debug"), LevelFilter::Debug);
        assert_eq!(parse_level("WARNING"), LevelFilter::Warn);
        assert_eq!(parse_level("critical"), LevelFilter::Error);
        assert_eq!(parse_level("nonsense"), LevelFilter::Info);
    }

    #[test]
    fn log_file_receives_enabled_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.log");
        fs::write(&path, "earlier run\n").unwrap();
        let logger =
            FileTeeLogger::open(console_logger(LevelFilter::Info), &path, LevelFilter::Info).unwrap();

        logger.log(
            &Record::builder()
                .args(format_args!("0001-0001: delivered 2 articles"))
                .level(Level::Info)
                .target("wos_export::aggregate")
                .build(),
        );
        logger.log(
            &Record::builder()
                .args(format_args!("article 3 of 9"))
                .level(Level::Debug)
                .target("wos_export::aggregate")
                .build(),
        );
        logger.flush();

        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "earlier run");
        assert!(lines[1].ends_with("INFO  [wos_export::aggregate] 0001-0001: delivered 2 articles"));
    }
}
