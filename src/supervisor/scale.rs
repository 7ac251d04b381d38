//! Clustered multi-instance scaling.
//!
//! Instances of a cluster share a base name and are addressed as
//! `<base>:<instance_id>`. Scaling a fork-mode process up first renames it
//! to `<base>:0`.

use super::Supervisor;
use crate::error::{DaemonError, DaemonResult};
use crate::event::Events;
use crate::logs::collector::LogCollector;
use itertools::Itertools;
use nix::sys::signal::Signal;

const SCALE_DOWN_KILL_TIMEOUT_MS: u32 = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleResult {
    pub started: u32,
    pub stopped: u32,
}

pub(crate) fn is_cluster_member(name: &str, base: &str) -> bool {
    name == base
        || name
            .strip_prefix(base)
            .and_then(|rest| rest.strip_prefix(':'))
            .is_some_and(|digits| {
                !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
            })
}

impl Supervisor {
    /// Scale the cluster `base` to `target` instances. Up revives stopped
    /// members first and then spawns fresh instances past the highest
    /// existing instance id; down stops the highest instance ids first
    /// (SIGTERM with the usual escalation).
    pub fn scale_cluster(
        &mut self,
        base: &str,
        target: u32,
        collector: &mut LogCollector,
        events: &mut Events,
    ) -> DaemonResult<ScaleResult> {
        let target = target.max(1);
        let members: Vec<u32> = self
            .procs
            .values()
            .filter(|p| is_cluster_member(&p.name, base))
            .map(|p| p.id)
            .collect();
        if members.is_empty() {
            return Err(DaemonError::NameNotFound(base.to_string()));
        }
        // scaled-down instances stay in the table as stopped records, so
        // the live instance count is what gets compared to the target
        let active: Vec<u32> = members
            .iter()
            .copied()
            .filter(|id| self.procs.get(id).is_some_and(|p| p.status.is_active()))
            .collect();
        let current = active.len() as u32;

        let mut started = 0u32;
        let mut stopped = 0u32;
        if target > current {
            self.promote_fork_mode(base, &members, collector);

            // revive stopped members before minting new instance ids, so
            // instance ids stay dense under the target
            let revivable = members
                .iter()
                .copied()
                .filter(|id| !active.contains(id))
                .sorted_by_key(|id| {
                    self.procs
                        .get(id)
                        .map(|p| p.config.instance_id)
                        .unwrap_or(0)
                })
                .collect_vec();
            for id in revivable {
                if current + started >= target {
                    break;
                }
                match self.do_restart(id, collector, events) {
                    Ok(()) => started += 1,
                    Err(err) => error!("failed to revive instance {id}: {err}"),
                }
            }

            let template = self
                .procs
                .get(&members[0])
                .ok_or(DaemonError::ProcessNotFound(members[0]))?
                .config
                .clone();
            let mut next_instance = members
                .iter()
                .filter_map(|id| self.procs.get(id))
                .map(|p| p.config.instance_id)
                .max()
                .unwrap_or(0)
                + 1;
            while current + started < target {
                let mut config = template.clone();
                config.name = format!("{base}:{next_instance}");
                config.instance_id = next_instance;
                config.instances = target;
                match self.start_process(config, collector) {
                    Ok((_, stdout_fd, stderr_fd)) => {
                        self.push_pending_pipe_fds(stdout_fd, stderr_fd);
                        started += 1;
                    }
                    Err(err) => {
                        error!("failed to start {base}:{next_instance}: {err}");
                        break;
                    }
                }
                next_instance += 1;
            }
        } else if target < current {
            let victims = active
                .iter()
                .copied()
                .sorted_by_key(|id| {
                    self.procs
                        .get(id)
                        .map(|p| p.config.instance_id)
                        .unwrap_or(0)
                })
                .rev()
                .take((current - target) as usize)
                .collect_vec();
            for id in victims {
                if self
                    .stop_process(id, Signal::SIGTERM as i32, SCALE_DOWN_KILL_TIMEOUT_MS)
                    .is_ok()
                {
                    stopped += 1;
                }
            }
        }

        for info in self.procs.values_mut() {
            if is_cluster_member(&info.name, base) {
                info.config.instances = target;
            }
        }
        Ok(ScaleResult { started, stopped })
    }

    /// A single fork-mode match (no `:N` suffix) becomes instance 0 before
    /// siblings are added.
    fn promote_fork_mode(&mut self, base: &str, members: &[u32], collector: &mut LogCollector) {
        if members.len() != 1 {
            return;
        }
        let Some(info) = self.procs.get_mut(&members[0]) else {
            return;
        };
        if info.name != base {
            return;
        }
        let new_name = format!("{base}:0");
        info!("renaming {} to {new_name} for cluster mode", info.name);
        info.name = new_name.clone();
        info.config.name = new_name.clone();
        info.config.instance_id = 0;
        collector.set_name(members[0], &new_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_member_matching() {
        assert!(is_cluster_member("web", "web"));
        assert!(is_cluster_member("web:0", "web"));
        assert!(is_cluster_member("web:12", "web"));
        assert!(!is_cluster_member("web:", "web"));
        assert!(!is_cluster_member("web:x", "web"));
        assert!(!is_cluster_member("webapp", "web"));
        assert!(!is_cluster_member("web2:0", "web"));
        assert!(!is_cluster_member("api", "web"));
    }
}
