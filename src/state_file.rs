//! State directory management and process-set snapshots.
//!
//! Owns the layout under the state dir: the control socket path, the pid
//! file, the logs directory, and `state.bin`, a little-endian snapshot of
//! every managed process config written with the wire codec's field
//! primitives. Loading tolerates short records (documented defaults) and a
//! malformed tail (the valid prefix wins).

use crate::error::{DaemonError, DaemonResult};
use crate::ipc::protocol::{PayloadReader, PayloadWriter};
use crate::process::ProcessConfig;
use nix::errno::Errno;
use std::fs;
use std::path::{Path, PathBuf};

pub const SOCKET_NAME: &str = "velos.sock";
pub const PID_NAME: &str = "velos.pid";
pub const STATE_NAME: &str = "state.bin";

pub struct StateFile {
    state_dir: PathBuf,
}

impl StateFile {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            state_dir: state_dir.to_path_buf(),
        }
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state_dir.join(SOCKET_NAME)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir.join(PID_NAME)
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_NAME)
    }

    /// Create the directory layout and write the daemon's pid file.
    pub fn init(&self) -> crate::Result<()> {
        xx::file::mkdirp(&self.state_dir)?;
        xx::file::mkdirp(self.log_dir())?;
        xx::file::write(self.pid_path(), format!("{}\n", std::process::id()))?;
        Ok(())
    }

    pub fn read_pid_file(&self) -> Option<u32> {
        fs::read_to_string(self.pid_path())
            .ok()?
            .trim()
            .parse()
            .ok()
    }

    pub fn remove_pid_file(&self) {
        let _ = fs::remove_file(self.pid_path());
    }

    /// Write the snapshot. Good enough for normal shutdown; crash-atomic
    /// writes are not a requirement of this format.
    pub fn save(&self, configs: &[ProcessConfig]) -> DaemonResult<()> {
        let mut w = PayloadWriter::new();
        w.u32(configs.len() as u32);
        for config in configs {
            config.encode(&mut w);
            w.u32(config.instance_id);
        }
        fs::write(self.state_path(), w.into_inner())
            .map_err(|e| io_err("write state.bin", &e))?;
        debug!("saved {} process configs", configs.len());
        Ok(())
    }

    /// Load the snapshot. A missing file is an empty set; a malformed tail
    /// yields the valid prefix.
    pub fn load(&self) -> DaemonResult<Vec<ProcessConfig>> {
        let buf = match fs::read(self.state_path()) {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(io_err("read state.bin", &e)),
        };
        let mut r = PayloadReader::new(&buf);
        let Ok(count) = r.u32() else {
            return Ok(vec![]);
        };
        let mut configs = Vec::with_capacity(count as usize);
        for n in 0..count {
            if r.at_end() {
                warn!("state.bin truncated after {n} of {count} records");
                break;
            }
            match decode_record(&mut r) {
                Ok(config) if !config.name.is_empty() => configs.push(config),
                _ => {
                    warn!("state.bin record {n} malformed, keeping the first {n}");
                    break;
                }
            }
        }
        Ok(configs)
    }
}

fn decode_record(r: &mut PayloadReader) -> DaemonResult<ProcessConfig> {
    let mut config = ProcessConfig::decode(r)?;
    config.instance_id = r.u32_or(0)?;
    Ok(config)
}

fn io_err(op: &'static str, e: &std::io::Error) -> DaemonError {
    DaemonError::Os {
        op,
        errno: Errno::from_raw(e.raw_os_error().unwrap_or(libc::EIO)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_configs() -> Vec<ProcessConfig> {
        vec![
            ProcessConfig {
                name: "api".to_string(),
                script: "/srv/api/main.py".to_string(),
                cwd: "/srv/api".to_string(),
                interpreter: "python3".to_string(),
                autorestart: true,
                max_restarts: -1,
                exp_backoff: true,
                max_memory_restart: 512 * 1024 * 1024,
                ..Default::default()
            },
            ProcessConfig {
                name: "worker:1".to_string(),
                script: "/srv/worker.js".to_string(),
                watch: true,
                watch_paths: "/srv;/etc/worker".to_string(),
                watch_ignore: "node_modules".to_string(),
                cron_restart: "0 3 * * *".to_string(),
                wait_ready: true,
                shutdown_with_message: true,
                instances: 4,
                instance_id: 1,
                ..Default::default()
            },
        ]
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let state = StateFile::new(dir.path());
        let configs = sample_configs();
        state.save(&configs).unwrap();
        assert_eq!(state.load().unwrap(), configs);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let state = StateFile::new(dir.path());
        assert_eq!(state.load().unwrap(), vec![]);
    }

    #[test]
    fn test_load_truncated_returns_prefix() {
        let dir = TempDir::new().unwrap();
        let state = StateFile::new(dir.path());
        state.save(&sample_configs()).unwrap();

        let bytes = fs::read(state.state_path()).unwrap();
        // chop into the middle of the second record
        fs::write(state.state_path(), &bytes[..bytes.len() - 30]).unwrap();

        let loaded = state.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "api");
    }

    #[test]
    fn test_load_garbage_is_empty() {
        let dir = TempDir::new().unwrap();
        let state = StateFile::new(dir.path());
        fs::write(state.state_path(), [0xff, 0x01]).unwrap();
        assert_eq!(state.load().unwrap(), vec![]);
    }

    #[test]
    fn test_pid_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let state = StateFile::new(dir.path());
        state.init().unwrap();
        assert_eq!(state.read_pid_file(), Some(std::process::id()));
        state.remove_pid_file();
        assert_eq!(state.read_pid_file(), None);
    }
}
