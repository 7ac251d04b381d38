//! Managed process records.
//!
//! `ProcessConfig` is the immutable spec of a process as received over the
//! wire; `ProcessInfo` is the supervisor-owned runtime record built around
//! it. Config field order here is the `process_start` payload layout, which
//! the state snapshot reuses.

use crate::error::ProtocolError;
use crate::ipc::protocol::{PayloadReader, PayloadWriter};
use crate::process_status::ProcessStatus;
use serde::Serialize;
use std::fmt::Display;
use std::io::Read;
use std::path::Path;

pub const DEFAULT_KILL_TIMEOUT_MS: u32 = 5000;
pub const DEFAULT_MIN_UPTIME_MS: u64 = 1000;
pub const DEFAULT_LISTEN_TIMEOUT_MS: u32 = 8000;
pub const DEFAULT_WATCH_DELAY_MS: u32 = 1000;
pub const DEFAULT_MAX_RESTARTS: i32 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessConfig {
    pub name: String,
    pub script: String,
    pub cwd: String,
    /// Empty means auto-detect (shebang, then extension).
    pub interpreter: String,
    pub kill_timeout_ms: u32,
    pub autorestart: bool,
    /// Negative means unbounded.
    pub max_restarts: i32,
    /// An exit below this uptime counts as a crash.
    pub min_uptime_ms: u64,
    pub restart_delay_ms: u32,
    pub exp_backoff: bool,
    /// RSS ceiling in bytes, 0 = unbounded.
    pub max_memory_restart: u64,
    pub watch: bool,
    pub watch_delay_ms: u32,
    /// Semicolon-separated; empty = watch the cwd.
    pub watch_paths: String,
    /// Semicolon-separated ignore substrings.
    pub watch_ignore: String,
    /// Five-field cron expression, empty = none.
    pub cron_restart: String,
    pub wait_ready: bool,
    pub listen_timeout_ms: u32,
    pub shutdown_with_message: bool,
    pub instances: u32,
    pub instance_id: u32,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            script: String::new(),
            cwd: String::new(),
            interpreter: String::new(),
            kill_timeout_ms: DEFAULT_KILL_TIMEOUT_MS,
            autorestart: false,
            max_restarts: DEFAULT_MAX_RESTARTS,
            min_uptime_ms: DEFAULT_MIN_UPTIME_MS,
            restart_delay_ms: 0,
            exp_backoff: false,
            max_memory_restart: 0,
            watch: false,
            watch_delay_ms: DEFAULT_WATCH_DELAY_MS,
            watch_paths: String::new(),
            watch_ignore: String::new(),
            cron_restart: String::new(),
            wait_ready: false,
            listen_timeout_ms: DEFAULT_LISTEN_TIMEOUT_MS,
            shutdown_with_message: false,
            instances: 1,
            instance_id: 0,
        }
    }
}

impl ProcessConfig {
    /// Decode a `process_start` payload. `name` and `script` are required;
    /// every trailing field that is absent takes its documented default
    /// (`instance_id` is never on the wire, the supervisor assigns it).
    pub fn decode(r: &mut PayloadReader) -> Result<Self, ProtocolError> {
        let d = Self::default();
        Ok(Self {
            name: r.string()?,
            script: r.string()?,
            cwd: r.string_or("")?,
            interpreter: r.string_or("")?,
            kill_timeout_ms: r.u32_or(d.kill_timeout_ms)?,
            autorestart: r.u8_or(0)? != 0,
            max_restarts: r.i32_or(d.max_restarts)?,
            min_uptime_ms: r.u64_or(d.min_uptime_ms)?,
            restart_delay_ms: r.u32_or(0)?,
            exp_backoff: r.u8_or(0)? != 0,
            max_memory_restart: r.u64_or(0)?,
            watch: r.u8_or(0)? != 0,
            watch_delay_ms: r.u32_or(d.watch_delay_ms)?,
            watch_paths: r.string_or("")?,
            watch_ignore: r.string_or("")?,
            cron_restart: r.string_or("")?,
            wait_ready: r.u8_or(0)? != 0,
            listen_timeout_ms: r.u32_or(d.listen_timeout_ms)?,
            shutdown_with_message: r.u8_or(0)? != 0,
            instances: r.u32_or(1)?.max(1),
            instance_id: 0,
        })
    }

    /// Encode in `process_start` payload order (without `instance_id`).
    pub fn encode(&self, w: &mut PayloadWriter) {
        w.string(&self.name)
            .string(&self.script)
            .string(&self.cwd)
            .string(&self.interpreter)
            .u32(self.kill_timeout_ms)
            .u8(self.autorestart as u8)
            .i32(self.max_restarts)
            .u64(self.min_uptime_ms)
            .u32(self.restart_delay_ms)
            .u8(self.exp_backoff as u8)
            .u64(self.max_memory_restart)
            .u8(self.watch as u8)
            .u32(self.watch_delay_ms)
            .string(&self.watch_paths)
            .string(&self.watch_ignore)
            .string(&self.cron_restart)
            .u8(self.wait_ready as u8)
            .u32(self.listen_timeout_ms)
            .u8(self.shutdown_with_message as u8)
            .u32(self.instances);
    }
}

/// Supervisor-owned runtime record.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub id: u32,
    pub name: String,
    pub pid: u32,
    pub status: ProcessStatus,
    pub restart_count: u32,
    pub consecutive_crashes: u32,
    pub memory_bytes: u64,
    pub start_time_ms: u64,
    pub last_restart_ms: u64,
    pub config: ProcessConfig,
}

impl ProcessInfo {
    pub fn uptime_ms(&self, now_ms: u64) -> u64 {
        if self.status.is_active() && self.pid > 0 {
            now_ms.saturating_sub(self.start_time_ms)
        } else {
            0
        }
    }
}

impl Display for ProcessInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Build the argv for a script: an explicit interpreter wins, then the
/// shebang, then a fixed extension table, and as a last resort the script
/// is exec'd directly.
pub fn resolve_argv(script: &str, interpreter: &str) -> Vec<String> {
    if !interpreter.trim().is_empty() {
        let mut argv = shell_words::split(interpreter)
            .unwrap_or_else(|_| vec![interpreter.to_string()]);
        argv.push(script.to_string());
        return argv;
    }
    if let Some(mut argv) = shebang_argv(script) {
        argv.push(script.to_string());
        return argv;
    }
    let extension = Path::new(script)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");
    let interp: &[&str] = match extension {
        "py" => &["python3"],
        "js" | "mjs" | "cjs" => &["node"],
        "ts" | "tsx" => &["npx", "tsx"],
        "rb" => &["ruby"],
        "sh" => &["/bin/sh"],
        _ => &[],
    };
    let mut argv: Vec<String> = interp.iter().map(|s| s.to_string()).collect();
    argv.push(script.to_string());
    argv
}

/// First 256 bytes of the script: a `#!` line becomes the interpreter argv
/// (`/usr/bin/env NAME` and direct `/bin/sh`-style lines both work).
fn shebang_argv(script: &str) -> Option<Vec<String>> {
    let mut buf = [0u8; 256];
    let mut file = std::fs::File::open(script).ok()?;
    let n = file.read(&mut buf).ok()?;
    let head = &buf[..n];
    if !head.starts_with(b"#!") {
        return None;
    }
    let line = head[2..].split(|b| *b == b'\n').next()?;
    let line = String::from_utf8_lossy(line);
    let argv = shell_words::split(line.trim()).ok()?;
    if argv.is_empty() { None } else { Some(argv) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_wire_round_trip_with_defaults() {
        let config = ProcessConfig {
            name: "web".to_string(),
            script: "/srv/web/server.js".to_string(),
            cwd: "/srv/web".to_string(),
            autorestart: true,
            max_restarts: 3,
            exp_backoff: true,
            cron_restart: "0 4 * * *".to_string(),
            instances: 2,
            ..Default::default()
        };
        let mut w = PayloadWriter::new();
        config.encode(&mut w);
        let buf = w.into_inner();
        let decoded = ProcessConfig::decode(&mut PayloadReader::new(&buf)).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_decode_short_payload_uses_defaults() {
        // only name and script, as an old client would send
        let mut w = PayloadWriter::new();
        w.string("app").string("/bin/app.sh");
        let buf = w.into_inner();
        let config = ProcessConfig::decode(&mut PayloadReader::new(&buf)).unwrap();
        assert_eq!(config.name, "app");
        assert_eq!(config.kill_timeout_ms, DEFAULT_KILL_TIMEOUT_MS);
        assert_eq!(config.min_uptime_ms, DEFAULT_MIN_UPTIME_MS);
        assert_eq!(config.listen_timeout_ms, DEFAULT_LISTEN_TIMEOUT_MS);
        assert_eq!(config.max_restarts, DEFAULT_MAX_RESTARTS);
        assert_eq!(config.instances, 1);
        assert!(!config.autorestart);
    }

    #[test]
    fn test_decode_missing_required_field() {
        let mut w = PayloadWriter::new();
        w.string("app");
        let buf = w.into_inner();
        assert!(ProcessConfig::decode(&mut PayloadReader::new(&buf)).is_err());
    }

    #[test]
    fn test_explicit_interpreter_wins() {
        assert_eq!(
            resolve_argv("/srv/app.py", "/usr/bin/python3.12"),
            vec!["/usr/bin/python3.12", "/srv/app.py"]
        );
        // interpreter values can carry their own arguments
        assert_eq!(
            resolve_argv("/srv/app.js", "node --inspect"),
            vec!["node", "--inspect", "/srv/app.js"]
        );
    }

    #[test]
    fn test_shebang_detection() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("run");
        fs::write(&script, "#!/usr/bin/env python3\nprint('hi')\n").unwrap();
        let script = script.to_str().unwrap().to_string();
        assert_eq!(
            resolve_argv(&script, ""),
            vec!["/usr/bin/env".to_string(), "python3".to_string(), script]
        );
    }

    #[test]
    fn test_shebang_direct_shell() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("run");
        fs::write(&script, "#!/bin/sh\necho hi\n").unwrap();
        let script = script.to_str().unwrap().to_string();
        assert_eq!(
            resolve_argv(&script, ""),
            vec!["/bin/sh".to_string(), script]
        );
    }

    #[test]
    fn test_extension_mapping() {
        assert_eq!(resolve_argv("app.py", ""), vec!["python3", "app.py"]);
        assert_eq!(resolve_argv("app.mjs", ""), vec!["node", "app.mjs"]);
        assert_eq!(resolve_argv("app.ts", ""), vec!["npx", "tsx", "app.ts"]);
        assert_eq!(resolve_argv("app.rb", ""), vec!["ruby", "app.rb"]);
        assert_eq!(resolve_argv("app.sh", ""), vec!["/bin/sh", "app.sh"]);
    }

    #[test]
    fn test_unknown_script_execs_directly() {
        assert_eq!(resolve_argv("/usr/bin/myapp", ""), vec!["/usr/bin/myapp"]);
    }
}
