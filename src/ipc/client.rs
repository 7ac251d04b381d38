//! Blocking IPC client used by the CLI.
//!
//! One frame out, one frame back, strictly in order; request ids are a
//! per-connection counter and every response is checked against them.

use crate::env;
use crate::ipc::protocol::{
    self, Command, PayloadReader, PayloadWriter, HEADER_LEN, STATUS_OK,
};
use crate::logs::{LogLevel, Stream};
use crate::process::ProcessConfig;
use crate::process_status::ProcessStatus;
use crate::state_file::StateFile;
use crate::Result;
use exponential_backoff::Backoff;
use miette::{bail, miette, IntoDiagnostic};
use serde::Serialize;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_MIN_DELAY: Duration = Duration::from_millis(100);
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(1);

pub struct IpcClient {
    stream: UnixStream,
    next_request_id: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessListEntry {
    pub id: u32,
    pub name: String,
    pub pid: u32,
    pub status: ProcessStatus,
    pub memory_bytes: u64,
    pub uptime_ms: u64,
    pub restart_count: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessDetail {
    pub id: u32,
    pub name: String,
    pub pid: u32,
    pub status: ProcessStatus,
    pub memory_bytes: u64,
    pub uptime_ms: u64,
    pub restart_count: u32,
    pub consecutive_crashes: u32,
    pub last_restart_ms: u64,
    pub script: String,
    pub cwd: String,
    pub interpreter: String,
    pub kill_timeout_ms: u32,
    pub autorestart: bool,
    pub max_restarts: i32,
    pub min_uptime_ms: u64,
    pub restart_delay_ms: u32,
    pub exp_backoff: bool,
    pub max_memory_restart: u64,
    pub watch: bool,
    pub cron_restart: String,
    pub wait_ready: bool,
    pub shutdown_with_message: bool,
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp_ms: u64,
    pub level: LogLevel,
    pub stream: Stream,
    pub message: String,
}

impl IpcClient {
    /// Connect to the daemon for `state_dir`, optionally spawning it in the
    /// background first. Connection attempts back off exponentially.
    pub fn connect(state_dir: &Path, autostart: bool) -> Result<Self> {
        let socket_path = StateFile::new(state_dir).socket_path();
        if autostart && !socket_path.exists() {
            start_daemon_in_background(state_dir)?;
        }
        for duration in Backoff::new(CONNECT_ATTEMPTS, CONNECT_MIN_DELAY, CONNECT_MAX_DELAY) {
            match UnixStream::connect(&socket_path) {
                Ok(stream) => {
                    trace!("connected to {}", socket_path.display());
                    return Ok(Self {
                        stream,
                        next_request_id: 1,
                    });
                }
                Err(err) => {
                    if let Some(duration) = duration {
                        debug!("connect failed ({err}), retrying in {duration:?}");
                        std::thread::sleep(duration);
                    } else {
                        return Err(miette!(
                            help = "is the daemon running? start it with: velos daemon",
                            "failed to connect to {} after {CONNECT_ATTEMPTS} attempts: {err}",
                            socket_path.display()
                        ));
                    }
                }
            }
        }
        bail!("failed to connect to {}", socket_path.display());
    }

    fn request(&mut self, command: Command, body: &[u8]) -> Result<Vec<u8>> {
        let id = self.next_request_id;
        self.next_request_id += 1;
        let payload = protocol::encode_request(id, command, body);
        let frame = protocol::encode_frame(&payload)?;
        self.stream.write_all(&frame).into_diagnostic()?;

        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).into_diagnostic()?;
        let len = protocol::decode_header(&header)?;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).into_diagnostic()?;
        let response = protocol::decode_response(&payload)?;
        if response.id != id {
            bail!("response id {} does not match request {id}", response.id);
        }
        if response.status != STATUS_OK {
            bail!("{}", String::from_utf8_lossy(response.body));
        }
        Ok(response.body.to_vec())
    }

    pub fn start(&mut self, config: &ProcessConfig) -> Result<u32> {
        let mut w = PayloadWriter::new();
        config.encode(&mut w);
        let body = self.request(Command::ProcessStart, &w.into_inner())?;
        Ok(PayloadReader::new(&body).u32()?)
    }

    pub fn stop(&mut self, id: u32, signal: u8, timeout_ms: u32) -> Result<()> {
        let mut w = PayloadWriter::new();
        w.u32(id).u8(signal).u32(timeout_ms);
        self.request(Command::ProcessStop, &w.into_inner())?;
        Ok(())
    }

    pub fn restart(&mut self, id: u32) -> Result<()> {
        let mut w = PayloadWriter::new();
        w.u32(id);
        self.request(Command::ProcessRestart, &w.into_inner())?;
        Ok(())
    }

    pub fn delete(&mut self, id: u32) -> Result<()> {
        let mut w = PayloadWriter::new();
        w.u32(id);
        self.request(Command::ProcessDelete, &w.into_inner())?;
        Ok(())
    }

    pub fn list(&mut self) -> Result<Vec<ProcessListEntry>> {
        let body = self.request(Command::ProcessList, &[])?;
        let mut r = PayloadReader::new(&body);
        let count = r.u32()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(ProcessListEntry {
                id: r.u32()?,
                name: r.string()?,
                pid: r.u32()?,
                status: decode_status(r.u8()?)?,
                memory_bytes: r.u64()?,
                uptime_ms: r.u64()?,
                restart_count: r.u32()?,
            });
        }
        Ok(entries)
    }

    pub fn info(&mut self, id: u32) -> Result<ProcessDetail> {
        let mut w = PayloadWriter::new();
        w.u32(id);
        let body = self.request(Command::ProcessInfo, &w.into_inner())?;
        let mut r = PayloadReader::new(&body);
        Ok(ProcessDetail {
            id: r.u32()?,
            name: r.string()?,
            pid: r.u32()?,
            status: decode_status(r.u8()?)?,
            memory_bytes: r.u64()?,
            uptime_ms: r.u64()?,
            restart_count: r.u32()?,
            consecutive_crashes: r.u32()?,
            last_restart_ms: r.u64()?,
            script: r.string()?,
            cwd: r.string()?,
            interpreter: r.string()?,
            kill_timeout_ms: r.u32()?,
            autorestart: r.u8()? != 0,
            max_restarts: r.i32()?,
            min_uptime_ms: r.u64()?,
            restart_delay_ms: r.u32()?,
            exp_backoff: r.u8()? != 0,
            max_memory_restart: r.u64()?,
            watch: r.u8()? != 0,
            cron_restart: r.string()?,
            wait_ready: r.u8()? != 0,
            shutdown_with_message: r.u8()? != 0,
        })
    }

    pub fn scale(&mut self, name: &str, target: u32) -> Result<(u32, u32)> {
        let mut w = PayloadWriter::new();
        w.string(name).u32(target);
        let body = self.request(Command::ProcessScale, &w.into_inner())?;
        let mut r = PayloadReader::new(&body);
        Ok((r.u32()?, r.u32()?))
    }

    pub fn log_read(&mut self, id: u32, lines: u32) -> Result<Vec<LogLine>> {
        let mut w = PayloadWriter::new();
        w.u32(id).u32(lines);
        let body = self.request(Command::LogRead, &w.into_inner())?;
        let mut r = PayloadReader::new(&body);
        let count = r.u32()?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            entries.push(LogLine {
                timestamp_ms: r.u64()?,
                level: LogLevel::from_repr(r.u8()?).unwrap_or(LogLevel::Info),
                stream: Stream::from_repr(r.u8()?).unwrap_or(Stream::Stdout),
                message: r.string()?,
            });
        }
        Ok(entries)
    }

    pub fn state_save(&mut self) -> Result<()> {
        self.request(Command::StateSave, &[])?;
        Ok(())
    }

    pub fn state_load(&mut self) -> Result<u32> {
        let body = self.request(Command::StateLoad, &[])?;
        Ok(PayloadReader::new(&body).u32()?)
    }

    pub fn ping(&mut self) -> Result<String> {
        let body = self.request(Command::Ping, &[])?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.request(Command::Shutdown, &[])?;
        Ok(())
    }
}

fn decode_status(raw: u8) -> Result<ProcessStatus> {
    ProcessStatus::from_repr(raw).ok_or_else(|| miette!("unknown status value {raw}"))
}

fn start_daemon_in_background(state_dir: &Path) -> Result<()> {
    debug!("spawning daemon for {}", state_dir.display());
    duct::cmd!(&*env::VELOS_BIN, "daemon", "--state-dir", state_dir)
        .stdout_null()
        .stderr_null()
        .start()
        .into_diagnostic()?;
    Ok(())
}
