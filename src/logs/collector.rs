//! Child pipe demultiplexer.
//!
//! Owns every child stdout/stderr fd from spawn to close. Pipe-readable
//! events land here; data is line-split and routed to the per-process ring
//! buffer and the on-disk writer. Closing paths deregister the fd from the
//! event layer before the actual close, so the event loop never sees a
//! stale descriptor.

use crate::error::{DaemonError, DaemonResult};
use crate::event::Events;
use crate::logs::ring::RingBuffer;
use crate::logs::writer::LogWriter;
use crate::logs::{now_ms, LogEntry, LogLevel, Stream};
use nix::errno::Errno;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::path::Path;

const READ_CHUNK: usize = 4096;

#[derive(Debug)]
struct ProcessLog {
    name: String,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    ring: RingBuffer,
}

pub struct LogCollector {
    writer: LogWriter,
    procs: HashMap<u32, ProcessLog>,
    by_fd: HashMap<RawFd, (u32, Stream)>,
}

impl LogCollector {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            writer: LogWriter::new(log_dir),
            procs: HashMap::new(),
            by_fd: HashMap::new(),
        }
    }

    /// Take ownership of a freshly spawned process's pipe read ends.
    pub fn add_process(&mut self, id: u32, name: &str, stdout_fd: RawFd, stderr_fd: RawFd) {
        self.by_fd.insert(stdout_fd, (id, Stream::Stdout));
        self.by_fd.insert(stderr_fd, (id, Stream::Stderr));
        self.procs.insert(
            id,
            ProcessLog {
                name: name.to_string(),
                stdout_fd,
                stderr_fd,
                ring: RingBuffer::default(),
            },
        );
    }

    /// Cluster rename: future lines land in the new files.
    pub fn set_name(&mut self, id: u32, name: &str) {
        if let Some(proc_log) = self.procs.get_mut(&id) {
            proc_log.name = name.to_string();
        }
    }

    /// One bounded non-blocking read, split at newlines. A trailing partial
    /// line is forwarded as its own entry; reassembly across reads is
    /// deliberately not attempted. Returns whether any data was consumed
    /// (the fd is level-triggered, so leftovers re-report; hang-up handling
    /// loops on this to drain).
    pub fn handle_pipe_data(&mut self, fd: RawFd) -> bool {
        let Some(&(id, stream)) = self.by_fd.get(&fd) else {
            return false;
        };
        let mut buf = [0u8; READ_CHUNK];
        let n = loop {
            let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n >= 0 {
                break n as usize;
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::EAGAIN => return false,
                errno => {
                    debug!("pipe read failed on fd {fd}: {errno}");
                    return false;
                }
            }
        };
        if n == 0 {
            return false; // EOF; the hup event drives the close
        }
        let Some(proc_log) = self.procs.get_mut(&id) else {
            return false;
        };
        let timestamp_ms = now_ms();
        let level = match stream {
            Stream::Stdout => LogLevel::Info,
            Stream::Stderr => LogLevel::Error,
        };
        for line in buf[..n].split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            if let Err(err) = self.writer.append(&proc_log.name, stream, line) {
                warn!("failed to append log for {}: {err}", proc_log.name);
            }
            proc_log.ring.push(LogEntry {
                timestamp_ms,
                level,
                stream,
                message: line.to_vec(),
            });
        }
        true
    }

    /// Deregister and close one pipe fd (hang-up path).
    pub fn close_pipe(&mut self, fd: RawFd, events: &mut Events) {
        if let Some((id, stream)) = self.by_fd.remove(&fd) {
            if let Some(proc_log) = self.procs.get_mut(&id) {
                match stream {
                    Stream::Stdout => proc_log.stdout_fd = -1,
                    Stream::Stderr => proc_log.stderr_fd = -1,
                }
            }
            events.remove_fd(fd);
            unsafe { libc::close(fd) };
        }
    }

    /// Drop a process: close both pipes and release the ring buffer. The
    /// on-disk files stay.
    pub fn remove_process(&mut self, id: u32, events: &mut Events) {
        let Some(proc_log) = self.procs.remove(&id) else {
            return;
        };
        for fd in [proc_log.stdout_fd, proc_log.stderr_fd] {
            if fd >= 0 {
                self.by_fd.remove(&fd);
                events.remove_fd(fd);
                unsafe { libc::close(fd) };
            }
        }
    }

    pub fn read_last(&self, id: u32, n: usize) -> DaemonResult<Vec<&LogEntry>> {
        let proc_log = self
            .procs
            .get(&id)
            .ok_or(DaemonError::ProcessNotFound(id))?;
        Ok(proc_log.ring.read_last(n).collect())
    }

    pub fn contains(&self, id: u32) -> bool {
        self.procs.contains_key(&id)
    }
}
