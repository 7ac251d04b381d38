//! Periodic scans: resource ceilings, file watches, cron restarts, and
//! readiness handshakes. All run from the daemon tick.

use super::{now_ms, Supervisor};
use crate::event::Events;
use crate::logs::collector::LogCollector;
use crate::process_status::ProcessStatus;
use chrono::{Datelike, Timelike};

const RESOURCE_SAMPLE_INTERVAL_MS: u64 = 2000;

impl Supervisor {
    /// Sample RSS for running children (rate-limited to every 2s) and
    /// restart any that crossed their memory ceiling.
    pub fn update_resource_usage(&mut self, collector: &mut LogCollector, events: &mut Events) {
        let now = now_ms();
        if now.saturating_sub(self.last_resource_sample_ms) < RESOURCE_SAMPLE_INTERVAL_MS {
            return;
        }
        self.last_resource_sample_ms = now;

        let pids: Vec<u32> = self
            .procs
            .values()
            .filter(|p| p.status.is_running() && p.pid > 0)
            .map(|p| p.pid)
            .collect();
        if pids.is_empty() {
            return;
        }
        self.sampler.refresh_pids(&pids);

        let mut over_limit = Vec::new();
        for info in self.procs.values_mut() {
            if !info.status.is_running() || info.pid == 0 {
                continue;
            }
            let rss = self.sampler.rss(info.pid);
            info.memory_bytes = rss;
            if info.config.max_memory_restart > 0 && rss > info.config.max_memory_restart {
                warn!(
                    "{} uses {rss} bytes (limit {}), restarting",
                    info.name, info.config.max_memory_restart
                );
                over_limit.push(info.id);
            }
        }
        for id in over_limit {
            self.restart_for_cause(id, collector, events);
        }
    }

    /// Restart running processes whose watcher reports a settled change.
    pub fn check_watchers(&mut self, collector: &mut LogCollector, events: &mut Events) {
        let mut fired: Vec<u32> = Vec::new();
        for (id, watcher) in self.watchers.iter_mut() {
            if watcher.check_for_changes() {
                fired.push(*id);
            }
        }
        for id in fired {
            if self.procs.get(&id).is_some_and(|p| p.status.is_running()) {
                info!("file change detected, restarting id {id}");
                self.restart_for_cause(id, collector, events);
            }
        }
    }

    /// At most one scan per wall-clock minute; restarts every running
    /// process whose cron expression matches the current local time.
    pub fn check_cron_restarts(&mut self, collector: &mut LogCollector, events: &mut Events) {
        if self.crons.is_empty() {
            return;
        }
        let local = chrono::Local::now();
        let minute_of_day = (local.hour() * 60 + local.minute()) as i64;
        if minute_of_day == self.last_cron_minute {
            return;
        }
        self.last_cron_minute = minute_of_day;

        let weekday = local.weekday().num_days_from_sunday();
        let due: Vec<u32> = self
            .crons
            .iter()
            .filter(|(_, cron)| {
                cron.matches(local.minute(), local.hour(), local.day(), local.month(), weekday)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            if self.procs.get(&id).is_some_and(|p| p.status.is_running()) {
                info!("cron restart for id {id}");
                self.restart_for_cause(id, collector, events);
            }
        }
    }

    /// Move `starting` processes to `running` on a readiness message, or
    /// after the listen timeout (silence counts as ready).
    pub fn check_wait_ready(&mut self) {
        let now = now_ms();
        let starting: Vec<u32> = self
            .procs
            .values()
            .filter(|p| p.status.is_starting())
            .map(|p| p.id)
            .collect();
        for id in starting {
            let ready = self.channels.get(&id).and_then(|ch| ch.read()).is_some();
            let Some(info) = self.procs.get_mut(&id) else {
                continue;
            };
            if ready {
                info!("{} reported ready", info.name);
                info.status = ProcessStatus::Running;
            } else if now.saturating_sub(info.start_time_ms) >= info.config.listen_timeout_ms as u64
            {
                debug!("{} listen timeout elapsed, assuming ready", info.name);
                info.status = ProcessStatus::Running;
            }
        }
    }

    /// Monitor-triggered restarts share the public restart path so the old
    /// child is terminated, and failures park the process as errored.
    fn restart_for_cause(&mut self, id: u32, collector: &mut LogCollector, events: &mut Events) {
        if let Err(err) = self.restart_process(id, collector, events) {
            error!("restart of id {id} failed: {err}");
            if let Some(info) = self.procs.get_mut(&id) {
                info.status = ProcessStatus::Errored;
            }
        }
    }
}
