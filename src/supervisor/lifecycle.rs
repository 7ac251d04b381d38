//! Stop, kill escalation, reap, restart, delete.

use super::spawn::spawn_child;
use super::{now_ms, Supervisor};
use crate::error::{DaemonError, DaemonResult};
use crate::ipc::channel::{self, IpcChannel};
use crate::logs::collector::LogCollector;
use crate::event::Events;
use crate::process_status::ProcessStatus;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Delivery failure means the child is already gone; the reap path cleans
/// up.
pub(crate) fn send_signal(pid: u32, signum: i32) {
    let signal = Signal::try_from(signum).unwrap_or(Signal::SIGTERM);
    if let Err(err) = kill(Pid::from_raw(pid as i32), signal) {
        if err != Errno::ESRCH {
            warn!("failed to signal pid {pid}: {err}");
        }
    }
}

impl Supervisor {
    /// Graceful stop: optional shutdown message on the channel, then the
    /// requested signal (default SIGTERM), then a SIGKILL deadline. No-op
    /// for processes that are not running.
    pub fn stop_process(&mut self, id: u32, signum: i32, timeout_ms: u32) -> DaemonResult<()> {
        let info = self
            .procs
            .get_mut(&id)
            .ok_or(DaemonError::ProcessNotFound(id))?;
        if !info.status.is_active() {
            return Ok(());
        }
        if info.config.shutdown_with_message {
            if let Some(ch) = self.channels.get(&id) {
                if let Err(err) = ch.send(&channel::shutdown_message()) {
                    debug!("shutdown message to {} failed: {err}", info.name);
                }
            }
        }
        let signum = if signum == 0 {
            Signal::SIGTERM as i32
        } else {
            signum
        };
        info!("stopping {} (pid {}) with signal {signum}", info.name, info.pid);
        send_signal(info.pid, signum);
        if signum != Signal::SIGKILL as i32 {
            self.pending_kills
                .insert(id, now_ms() + timeout_ms as u64);
        }
        // optimistic; the reap finalizes (errored if it dies badly later)
        info.status = ProcessStatus::Stopped;
        Ok(())
    }

    /// Escalate expired kill deadlines to SIGKILL. Entries go away whether
    /// or not an escalation was needed.
    pub fn check_pending_kills(&mut self) {
        let now = now_ms();
        let expired: Vec<u32> = self
            .pending_kills
            .iter()
            .filter(|(_, deadline)| now >= **deadline)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.pending_kills.remove(&id);
            let Some(info) = self.procs.get(&id) else {
                continue;
            };
            let unreaped = self.by_pid.get(&(info.pid as i32)) == Some(&id);
            if unreaped
                && matches!(
                    info.status,
                    ProcessStatus::Running | ProcessStatus::Stopped
                )
            {
                warn!("{} did not exit in time, sending SIGKILL", info.name);
                send_signal(info.pid, Signal::SIGKILL as i32);
            }
        }
    }

    /// SIGCHLD handler: reap every exited child and arbitrate restarts.
    pub fn handle_sigchld(&mut self, collector: &mut LogCollector, events: &mut Events) {
        loop {
            match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(pid, code)) => {
                    self.reap_one(pid.as_raw(), code != 0, collector, events)
                }
                Ok(WaitStatus::Signaled(pid, _, _)) => {
                    self.reap_one(pid.as_raw(), true, collector, events)
                }
                Ok(WaitStatus::StillAlive) => break,
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(_) => break, // ECHILD: nothing left to reap
            }
        }
    }

    fn reap_one(&mut self, pid: i32, abnormal: bool, collector: &mut LogCollector, events: &mut Events) {
        let Some(id) = self.by_pid.remove(&pid) else {
            return; // a replaced child from an earlier restart
        };
        self.pending_kills.remove(&id);
        let now = now_ms();
        let Some(info) = self.procs.get_mut(&id) else {
            return;
        };
        let was_running = info.status.is_running();
        info.status = if was_running && abnormal {
            ProcessStatus::Errored
        } else {
            ProcessStatus::Stopped
        };
        info!(
            "reaped {} (pid {pid}, {})",
            info.name,
            if abnormal { "abnormal exit" } else { "clean exit" }
        );

        if !(was_running && info.config.autorestart) {
            return;
        }
        let uptime = now.saturating_sub(info.start_time_ms);
        if uptime < info.config.min_uptime_ms {
            info.consecutive_crashes += 1;
        } else {
            info.consecutive_crashes = 0;
        }
        if info.config.max_restarts >= 0
            && info.consecutive_crashes >= info.config.max_restarts as u32
        {
            warn!(
                "{} crashed {} times in a row, giving up",
                info.name, info.consecutive_crashes
            );
            info.status = ProcessStatus::Errored;
            return;
        }
        let delay_ms = if info.config.exp_backoff {
            let base = if info.config.restart_delay_ms == 0 {
                100
            } else {
                info.config.restart_delay_ms as u64
            };
            let exp = info.consecutive_crashes.saturating_sub(1).min(20);
            (base << exp).min(15_000)
        } else {
            info.config.restart_delay_ms as u64
        };
        if delay_ms > 0 {
            debug!("scheduling restart of {} in {delay_ms}ms", info.name);
            self.pending_restarts.insert(id, now + delay_ms);
        } else if let Err(err) = self.do_restart(id, collector, events) {
            error!("restart failed: {err}");
            if let Some(info) = self.procs.get_mut(&id) {
                info.status = ProcessStatus::Errored;
            }
        }
    }

    /// Respawn under the same id: fresh pipes, fresh channel, updated
    /// runtime counters. New pipe fds go through the pending FIFO; the
    /// daemon loop registers them after the tick.
    pub(crate) fn do_restart(
        &mut self,
        id: u32,
        collector: &mut LogCollector,
        events: &mut Events,
    ) -> DaemonResult<()> {
        collector.remove_process(id, events);
        if let Some(mut ch) = self.channels.remove(&id) {
            ch.close();
        }
        let info = self
            .procs
            .get(&id)
            .ok_or(DaemonError::ProcessNotFound(id))?;
        let config = info.config.clone();

        let mut channel = if config.wait_ready || config.shutdown_with_message {
            Some(IpcChannel::new()?)
        } else {
            None
        };
        let spawned = match spawn_child(&config, channel.as_ref()) {
            Ok(spawned) => spawned,
            Err(err) => {
                if let Some(ch) = channel.as_mut() {
                    ch.close();
                }
                return Err(err);
            }
        };

        // a predecessor child still winding down must not resolve to this
        // id when it is finally reaped
        self.by_pid.retain(|_, mapped| *mapped != id);
        self.by_pid.insert(spawned.pid, id);

        let now = now_ms();
        let info = self
            .procs
            .get_mut(&id)
            .ok_or(DaemonError::ProcessNotFound(id))?;
        info.pid = spawned.pid as u32;
        info.status = if config.wait_ready {
            ProcessStatus::Starting
        } else {
            ProcessStatus::Running
        };
        info.start_time_ms = now;
        info.last_restart_ms = now;
        info.restart_count += 1;
        info!("restarted {} (pid {})", info.name, spawned.pid);

        collector.add_process(id, &config.name, spawned.stdout_fd, spawned.stderr_fd);
        if let Some(mut ch) = channel {
            ch.close_child();
            self.channels.insert(id, ch);
        }
        self.push_pending_pipe_fds(spawned.stdout_fd, spawned.stderr_fd);
        Ok(())
    }

    /// The IPC `process_restart` path: nudge a live child with SIGTERM,
    /// tidy the pid index, then respawn.
    pub fn restart_process(
        &mut self,
        id: u32,
        collector: &mut LogCollector,
        events: &mut Events,
    ) -> DaemonResult<()> {
        let info = self
            .procs
            .get(&id)
            .ok_or(DaemonError::ProcessNotFound(id))?;
        if info.status.is_active() && info.pid > 0 {
            let pid = info.pid;
            send_signal(pid, Signal::SIGTERM as i32);
            if let Ok(WaitStatus::Exited(..) | WaitStatus::Signaled(..)) =
                waitpid(Pid::from_raw(pid as i32), Some(WaitPidFlag::WNOHANG))
            {
                self.by_pid.remove(&(pid as i32));
            }
        }
        self.pending_kills.remove(&id);
        self.pending_restarts.remove(&id);
        self.do_restart(id, collector, events)
    }

    /// Fire restarts whose delay has elapsed.
    pub fn check_pending_restarts(&mut self, collector: &mut LogCollector, events: &mut Events) {
        let now = now_ms();
        let due: Vec<u32> = self
            .pending_restarts
            .iter()
            .filter(|(_, at)| now >= **at)
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            self.pending_restarts.remove(&id);
            if let Err(err) = self.do_restart(id, collector, events) {
                error!("delayed restart failed: {err}");
                if let Some(info) = self.procs.get_mut(&id) {
                    info.status = ProcessStatus::Errored;
                }
            }
        }
    }

    /// Remove a process entirely. A live child gets SIGKILL; log files on
    /// disk stay.
    pub fn delete_process(
        &mut self,
        id: u32,
        collector: &mut LogCollector,
        events: &mut Events,
    ) -> DaemonResult<()> {
        let info = self
            .procs
            .get(&id)
            .ok_or(DaemonError::ProcessNotFound(id))?;
        if info.status.is_active() && info.pid > 0 {
            send_signal(info.pid, Signal::SIGKILL as i32);
        }
        info!("deleting {}", info.name);
        self.by_pid.retain(|_, mapped| *mapped != id);
        self.pending_kills.remove(&id);
        self.pending_restarts.remove(&id);
        self.watchers.remove(&id);
        self.crons.remove(&id);
        if let Some(mut ch) = self.channels.remove(&id) {
            ch.close();
        }
        collector.remove_process(id, events);
        self.procs.shift_remove(&id);
        Ok(())
    }

    /// Shutdown path: SIGTERM everything and mark it stopped; the loop
    /// exits right after, so there is no waiting.
    pub fn stop_all(&mut self) {
        for info in self.procs.values_mut() {
            if info.status.is_active() && info.pid > 0 {
                info!("stopping {} (pid {})", info.name, info.pid);
                send_signal(info.pid, Signal::SIGTERM as i32);
                info.status = ProcessStatus::Stopped;
            }
        }
    }
}
