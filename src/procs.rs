//! Process statistics sampling.
//!
//! Thin wrapper over sysinfo, scoped to the pids the supervisor cares
//! about. Lives on the event-loop thread, so no locking.

use sysinfo::{ProcessesToUpdate, System};

pub struct Procs {
    system: System,
}

impl Default for Procs {
    fn default() -> Self {
        Self::new()
    }
}

impl Procs {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Refresh only the given pids; cheaper than a full process-table scan.
    pub fn refresh_pids(&mut self, pids: &[u32]) {
        let pids: Vec<sysinfo::Pid> = pids.iter().map(|p| sysinfo::Pid::from_u32(*p)).collect();
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&pids), true);
    }

    /// Most recent resident set size in bytes; 0 if the process is gone.
    pub fn rss(&self, pid: u32) -> u64 {
        self.system
            .process(sysinfo::Pid::from_u32(pid))
            .map(|p| p.memory())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rss_of_self() {
        let mut procs = Procs::new();
        let pid = std::process::id();
        procs.refresh_pids(&[pid]);
        assert!(procs.rss(pid) > 0);
    }

    #[test]
    fn test_rss_of_unknown_pid_is_zero() {
        let procs = Procs::new();
        assert_eq!(procs.rss(u32::MAX - 1), 0);
    }
}
