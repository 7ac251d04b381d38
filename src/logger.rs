use crate::env;
use log::{Level, LevelFilter, Metadata, Record};
use std::io::Write;

struct Logger {
    level: LevelFilter,
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            Level::Error => console::style("ERROR").red().to_string(),
            Level::Warn => console::style("WARN").yellow().to_string(),
            Level::Info => console::style("INFO").green().to_string(),
            Level::Debug => console::style("DEBUG").dim().to_string(),
            Level::Trace => console::style("TRACE").dim().to_string(),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{level} {}", record.args());
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

pub fn init() {
    let level = *env::VELOS_LOG;
    if log::set_boxed_logger(Box::new(Logger { level })).is_ok() {
        log::set_max_level(level);
    }
}
