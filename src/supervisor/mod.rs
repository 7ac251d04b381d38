//! Process supervisor.
//!
//! Split into focused submodules:
//! - `spawn`: fork/exec and pipe plumbing
//! - `lifecycle`: stop, kill escalation, reap, restart, delete
//! - `monitor`: resource, watch, cron, and readiness scans
//! - `scale`: clustered multi-instance scaling
//!
//! The supervisor owns the process table and every per-process auxiliary:
//! the pid index, watchers, cron expressions, readiness channels, pending
//! kill/restart deadlines, and the FIFO of pipe fds awaiting event-layer
//! registration. Only the event-loop thread mutates it, so there are no
//! locks; collaborators it does not own (log collector, event layer) are
//! passed in by the caller.

mod lifecycle;
mod monitor;
mod scale;
mod spawn;

pub use scale::ScaleResult;

use crate::cron::CronExpr;
use crate::error::{DaemonError, DaemonResult};
use crate::ipc::channel::IpcChannel;
use crate::process::{ProcessConfig, ProcessInfo};
use crate::procs::Procs;
use crate::watch_files::WatchFiles;
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;

pub struct Supervisor {
    pub(crate) procs: IndexMap<u32, ProcessInfo>,
    pub(crate) by_pid: HashMap<i32, u32>,
    pub(crate) watchers: HashMap<u32, WatchFiles>,
    pub(crate) crons: HashMap<u32, CronExpr>,
    pub(crate) channels: HashMap<u32, IpcChannel>,
    /// id -> absolute SIGKILL escalation deadline (ms).
    pub(crate) pending_kills: HashMap<u32, u64>,
    /// id -> absolute respawn time (ms); at most one per id.
    pub(crate) pending_restarts: HashMap<u32, u64>,
    pending_pipe_fds: VecDeque<RawFd>,
    pub(crate) sampler: Procs,
    next_id: u32,
    pub(crate) last_cron_minute: i64,
    pub(crate) last_resource_sample_ms: u64,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            procs: IndexMap::new(),
            by_pid: HashMap::new(),
            watchers: HashMap::new(),
            crons: HashMap::new(),
            channels: HashMap::new(),
            pending_kills: HashMap::new(),
            pending_restarts: HashMap::new(),
            pending_pipe_fds: VecDeque::new(),
            sampler: Procs::new(),
            next_id: 1,
            last_cron_minute: -1,
            last_resource_sample_ms: 0,
        }
    }

    /// Ids are daemon-local, start at 1, and are never reused.
    pub(crate) fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn get(&self, id: u32) -> DaemonResult<&ProcessInfo> {
        self.procs.get(&id).ok_or(DaemonError::ProcessNotFound(id))
    }

    pub fn processes(&self) -> impl Iterator<Item = &ProcessInfo> {
        self.procs.values()
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    /// Snapshot of every config, for persistence.
    pub fn configs(&self) -> Vec<ProcessConfig> {
        self.procs.values().map(|p| p.config.clone()).collect()
    }

    pub(crate) fn push_pending_pipe_fds(&mut self, stdout_fd: RawFd, stderr_fd: RawFd) {
        self.pending_pipe_fds.push_back(stdout_fd);
        self.pending_pipe_fds.push_back(stderr_fd);
    }

    /// Drained by the daemon loop after each tick; every fd goes to the
    /// event layer as a pipe registration.
    pub fn take_pending_pipe_fds(&mut self) -> Vec<RawFd> {
        self.pending_pipe_fds.drain(..).collect()
    }
}

pub(crate) use crate::logs::now_ms;
