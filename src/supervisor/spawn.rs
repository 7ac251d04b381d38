//! fork/exec and pipe plumbing.
//!
//! Everything the child touches after fork is prepared up front as
//! CStrings; the child branch sticks to async-signal-safe libc calls and
//! exits 127 if anything up to and including exec fails.

use super::{now_ms, Supervisor};
use crate::cron::CronExpr;
use crate::error::{DaemonError, DaemonResult};
use crate::ipc::channel::{self, IpcChannel};
use crate::logs::collector::LogCollector;
use crate::process::{resolve_argv, ProcessConfig, ProcessInfo};
use crate::process_status::ProcessStatus;
use crate::watch_files::WatchFiles;
use nix::errno::Errno;
use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::path::Path;

pub(crate) struct SpawnedChild {
    pub pid: i32,
    pub stdout_fd: RawFd,
    pub stderr_fd: RawFd,
}

impl Supervisor {
    /// Spawn a new process. Returns the new id and the stdout/stderr pipe
    /// read ends; the caller registers them with the event layer.
    pub fn start_process(
        &mut self,
        config: ProcessConfig,
        collector: &mut LogCollector,
    ) -> DaemonResult<(u32, RawFd, RawFd)> {
        // parse cron and set up the watcher first so a bad config fails the
        // start instead of a later tick
        let cron = if config.cron_restart.trim().is_empty() {
            None
        } else {
            Some(CronExpr::parse(&config.cron_restart)?)
        };
        let watcher = if config.watch {
            Some(WatchFiles::setup(
                &config.watch_paths,
                &config.watch_ignore,
                config.watch_delay_ms as u64,
                Path::new(&config.cwd),
            )?)
        } else {
            None
        };

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

        let id = self.alloc_id();
        let status = if config.wait_ready {
            ProcessStatus::Starting
        } else {
            ProcessStatus::Running
        };
        info!(
            "started {} (id {id}, pid {}, instance {})",
            config.name, spawned.pid, config.instance_id
        );
        collector.add_process(id, &config.name, spawned.stdout_fd, spawned.stderr_fd);
        self.by_pid.insert(spawned.pid, id);
        if let Some(cron) = cron {
            self.crons.insert(id, cron);
        }
        if let Some(watcher) = watcher {
            self.watchers.insert(id, watcher);
        }
        if let Some(mut ch) = channel {
            ch.close_child();
            self.channels.insert(id, ch);
        }
        self.procs.insert(
            id,
            ProcessInfo {
                id,
                name: config.name.clone(),
                pid: spawned.pid as u32,
                status,
                restart_count: 0,
                consecutive_crashes: 0,
                memory_bytes: 0,
                start_time_ms: now_ms(),
                last_restart_ms: 0,
                config,
            },
        );
        Ok((id, spawned.stdout_fd, spawned.stderr_fd))
    }
}

/// Fork and exec one child per the config, returning its pid and the
/// non-blocking read ends of its stdout/stderr pipes.
pub(crate) fn spawn_child(
    config: &ProcessConfig,
    channel: Option<&IpcChannel>,
) -> DaemonResult<SpawnedChild> {
    let argv = resolve_argv(&config.script, &config.interpreter);
    let c_argv: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<Result<_, _>>()
        .map_err(|_| DaemonError::Os {
            op: "exec argv",
            errno: Errno::EINVAL,
        })?;
    let mut argv_ptrs: Vec<*const libc::c_char> = c_argv.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    let c_cwd = if config.cwd.trim().is_empty() {
        None
    } else {
        Some(CString::new(config.cwd.as_str()).map_err(|_| DaemonError::Os {
            op: "chdir",
            errno: Errno::EINVAL,
        })?)
    };

    let mut child_env: Vec<(CString, CString)> = Vec::new();
    if let Some(ch) = channel {
        child_env.push(env_pair(channel::ENV_FD, &ch.child_fd().to_string())?);
    }
    if config.instances > 1 {
        let instance = config.instance_id.to_string();
        child_env.push(env_pair(channel::ENV_INSTANCE_ID, &instance)?);
        child_env.push(env_pair(channel::ENV_NODE_APP_INSTANCE, &instance)?);
    }

    let (out_rd, out_wr) = make_pipe()?;
    let (err_rd, err_wr) = match make_pipe() {
        Ok(fds) => fds,
        Err(err) => {
            unsafe {
                libc::close(out_rd);
                libc::close(out_wr);
            }
            return Err(err);
        }
    };

    let pid = unsafe { libc::fork() };
    if pid == -1 {
        unsafe {
            libc::close(out_rd);
            libc::close(out_wr);
            libc::close(err_rd);
            libc::close(err_wr);
        }
        return Err(DaemonError::os("fork"));
    }

    if pid == 0 {
        // child: wire the pipes onto stdout/stderr, expose the channel fd,
        // detach into its own session, exec. 127 on any failure.
        unsafe {
            libc::close(out_rd);
            libc::close(err_rd);
            if libc::dup2(out_wr, libc::STDOUT_FILENO) == -1
                || libc::dup2(err_wr, libc::STDERR_FILENO) == -1
            {
                libc::_exit(127);
            }
            libc::close(out_wr);
            libc::close(err_wr);
            if let Some(ch) = channel {
                ch.close_parent_raw();
            }
            for (name, value) in &child_env {
                libc::setenv(name.as_ptr(), value.as_ptr(), 1);
            }
            if let Some(cwd) = &c_cwd {
                if libc::chdir(cwd.as_ptr()) == -1 {
                    libc::_exit(127);
                }
            }
            libc::setsid();
            libc::execvp(argv_ptrs[0], argv_ptrs.as_ptr());
            libc::_exit(127);
        }
    }

    // parent
    unsafe {
        libc::close(out_wr);
        libc::close(err_wr);
    }
    channel::set_nonblocking(out_rd)?;
    channel::set_nonblocking(err_rd)?;
    Ok(SpawnedChild {
        pid,
        stdout_fd: out_rd,
        stderr_fd: err_rd,
    })
}

fn env_pair(name: &str, value: &str) -> DaemonResult<(CString, CString)> {
    let invalid = |_| DaemonError::Os {
        op: "setenv",
        errno: Errno::EINVAL,
    };
    Ok((
        CString::new(name).map_err(invalid)?,
        CString::new(value).map_err(invalid)?,
    ))
}

/// Close-on-exec pipe; dup2 in the child clears the flag on stdout/stderr.
fn make_pipe() -> DaemonResult<(RawFd, RawFd)> {
    let mut fds = [0 as RawFd; 2];
    #[cfg(target_os = "linux")]
    let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
    #[cfg(not(target_os = "linux"))]
    let rc = unsafe {
        let rc = libc::pipe(fds.as_mut_ptr());
        if rc == 0 {
            libc::fcntl(fds[0], libc::F_SETFD, libc::FD_CLOEXEC);
            libc::fcntl(fds[1], libc::F_SETFD, libc::FD_CLOEXEC);
        }
        rc
    };
    if rc == -1 {
        return Err(DaemonError::os("pipe"));
    }
    Ok((fds[0], fds[1]))
}
