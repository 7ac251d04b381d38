pub mod collector;
pub mod ring;
pub mod writer;

/// Which child pipe a log entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum Stream {
    Stdout = 0,
    Stderr = 1,
}

impl Stream {
    /// File name suffix: `<name>-out.log` / `<name>-err.log`.
    pub fn suffix(&self) -> &'static str {
        match self {
            Stream::Stdout => "out",
            Stream::Stderr => "err",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

/// One captured line. The message is an owned copy without its trailing
/// newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub timestamp_ms: u64,
    pub level: LogLevel,
    pub stream: Stream,
    pub message: Vec<u8>,
}

pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
