//! Size-rotated per-process log files.
//!
//! Lines land in `<log_dir>/<name>-out.log` / `<name>-err.log`. The writer
//! keeps a running size per (name, stream); once it reaches `max_size` the
//! live file is rotated to `.1` and older rotations shift up, dropping the
//! oldest past `retain`.

use crate::logs::Stream;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_RETAIN: u32 = 30;

#[derive(Debug)]
pub struct LogWriter {
    dir: PathBuf,
    max_size: u64,
    retain: u32,
    sizes: HashMap<(String, Stream), u64>,
}

impl LogWriter {
    pub fn new(dir: &Path) -> Self {
        Self::with_limits(dir, DEFAULT_MAX_SIZE, DEFAULT_RETAIN)
    }

    pub fn with_limits(dir: &Path, max_size: u64, retain: u32) -> Self {
        Self {
            dir: dir.to_path_buf(),
            max_size,
            retain,
            sizes: HashMap::new(),
        }
    }

    fn live_path(&self, name: &str, stream: Stream) -> PathBuf {
        self.dir.join(format!("{name}-{}.log", stream.suffix()))
    }

    fn rotated_path(&self, name: &str, stream: Stream, k: u32) -> PathBuf {
        self.dir.join(format!("{name}-{}.log.{k}", stream.suffix()))
    }

    /// Append one line, creating the file if absent, with exactly one
    /// trailing newline.
    pub fn append(&mut self, name: &str, stream: Stream, line: &[u8]) -> std::io::Result<()> {
        let path = self.live_path(name, stream);
        let key = (name.to_string(), stream);
        if !self.sizes.contains_key(&key) {
            // pick up where an earlier daemon run left the file
            let existing = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            self.sizes.insert(key.clone(), existing);
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut written = line.len() as u64;
        file.write_all(line)?;
        if !line.ends_with(b"\n") {
            file.write_all(b"\n")?;
            written += 1;
        }

        let size = {
            let size = self.sizes.entry(key.clone()).or_insert(0);
            *size += written;
            *size
        };
        if size >= self.max_size {
            self.rotate(name, stream)?;
            self.sizes.insert(key, 0);
        }
        Ok(())
    }

    fn rotate(&self, name: &str, stream: Stream) -> std::io::Result<()> {
        debug!("rotating logs for {name} ({stream})");
        let _ = fs::remove_file(self.rotated_path(name, stream, self.retain));
        for k in (1..self.retain).rev() {
            let from = self.rotated_path(name, stream, k);
            if from.exists() {
                let _ = fs::rename(from, self.rotated_path(name, stream, k + 1));
            }
        }
        fs::rename(
            self.live_path(name, stream),
            self.rotated_path(name, stream, 1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_adds_single_newline() {
        let dir = TempDir::new().unwrap();
        let mut w = LogWriter::new(dir.path());
        w.append("app", Stream::Stdout, b"hello").unwrap();
        w.append("app", Stream::Stdout, b"world\n").unwrap();
        let content = fs::read_to_string(dir.path().join("app-out.log")).unwrap();
        assert_eq!(content, "hello\nworld\n");
    }

    #[test]
    fn test_streams_are_separate_files() {
        let dir = TempDir::new().unwrap();
        let mut w = LogWriter::new(dir.path());
        w.append("app", Stream::Stdout, b"out").unwrap();
        w.append("app", Stream::Stderr, b"err").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("app-out.log")).unwrap(),
            "out\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("app-err.log")).unwrap(),
            "err\n"
        );
    }

    #[test]
    fn test_rotation_when_size_crossed() {
        let dir = TempDir::new().unwrap();
        let mut w = LogWriter::with_limits(dir.path(), 16, 3);
        w.append("app", Stream::Stdout, b"0123456789").unwrap(); // 11 bytes
        assert!(!dir.path().join("app-out.log.1").exists());
        w.append("app", Stream::Stdout, b"0123456789").unwrap(); // 22 >= 16
        let rotated = dir.path().join("app-out.log.1");
        assert!(rotated.exists());
        assert_eq!(
            fs::read_to_string(&rotated).unwrap(),
            "0123456789\n0123456789\n"
        );
        assert!(!dir.path().join("app-out.log").exists());

        // next append starts a fresh live file
        w.append("app", Stream::Stdout, b"x").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("app-out.log")).unwrap(),
            "x\n"
        );
    }

    #[test]
    fn test_rotation_shifts_and_drops_oldest() {
        let dir = TempDir::new().unwrap();
        let mut w = LogWriter::with_limits(dir.path(), 4, 2);
        for n in 0..4 {
            w.append("app", Stream::Stdout, format!("{n}{n}{n}{n}").as_bytes())
                .unwrap();
        }
        // every append rotated: live -> .1 -> .2, oldest dropped past retain=2
        assert_eq!(
            fs::read_to_string(dir.path().join("app-out.log.1")).unwrap(),
            "3333\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("app-out.log.2")).unwrap(),
            "2222\n"
        );
        assert!(!dir.path().join("app-out.log.3").exists());
    }

    #[test]
    fn test_size_resumes_from_existing_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app-out.log"), "0123456789\n").unwrap();
        let mut w = LogWriter::with_limits(dir.path(), 16, 3);
        w.append("app", Stream::Stdout, b"0123456789").unwrap();
        assert!(dir.path().join("app-out.log.1").exists());
    }
}
