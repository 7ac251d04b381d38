//! kqueue backend.
//!
//! Readable fds use level-triggered `EVFILT_READ`: consumers take one
//! bounded read per event and unread data re-reports on the next poll.
//! Signals use `EVFILT_SIGNAL`, which records deliveries even for ignored
//! signals.

use super::{kind_for, Event, FdKind};
use crate::error::{DaemonError, DaemonResult};
use nix::errno::Errno;
use std::collections::HashMap;
use std::os::unix::io::RawFd;

const MAX_EVENTS: usize = 64;

pub struct Events {
    kq: RawFd,
    fds: HashMap<RawFd, FdKind>,
}

impl Events {
    pub fn new() -> DaemonResult<Self> {
        let kq = unsafe { libc::kqueue() };
        if kq == -1 {
            return Err(DaemonError::os("kqueue"));
        }
        Ok(Self {
            kq,
            fds: HashMap::new(),
        })
    }

    fn change(&self, ident: usize, filter: i16, flags: u16) -> DaemonResult<()> {
        let kev = libc::kevent {
            ident,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: std::ptr::null_mut(),
        };
        let rc = unsafe {
            libc::kevent(
                self.kq,
                &kev,
                1,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        if rc == -1 {
            return Err(DaemonError::os("kevent(change)"));
        }
        Ok(())
    }

    pub fn add_fd(&mut self, fd: RawFd, kind: FdKind) -> DaemonResult<()> {
        self.change(fd as usize, libc::EVFILT_READ, libc::EV_ADD)?;
        self.fds.insert(fd, kind);
        Ok(())
    }

    pub fn remove_fd(&mut self, fd: RawFd) {
        self.fds.remove(&fd);
        let _ = self.change(fd as usize, libc::EVFILT_READ, libc::EV_DELETE);
    }

    pub fn add_signal(&mut self, signum: i32) -> DaemonResult<()> {
        // EVFILT_SIGNAL reports ignored signals too; SIGCHLD keeps its
        // default disposition so children still become reapable zombies.
        if signum != libc::SIGCHLD {
            unsafe { libc::signal(signum, libc::SIG_IGN) };
        }
        self.change(signum as usize, libc::EVFILT_SIGNAL, libc::EV_ADD)
    }

    pub fn poll(&mut self, out: &mut Vec<Event>, timeout_ms: Option<i32>) -> DaemonResult<usize> {
        out.clear();
        let timeout = timeout_ms.map(|ms| libc::timespec {
            tv_sec: (ms / 1000) as libc::time_t,
            tv_nsec: ((ms % 1000) * 1_000_000) as libc::c_long,
        });
        let timeout_ptr = timeout
            .as_ref()
            .map(|t| t as *const libc::timespec)
            .unwrap_or(std::ptr::null());
        let mut raw: [libc::kevent; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let n = loop {
            let n = unsafe {
                libc::kevent(
                    self.kq,
                    std::ptr::null(),
                    0,
                    raw.as_mut_ptr(),
                    MAX_EVENTS as i32,
                    timeout_ptr,
                )
            };
            if n == -1 {
                if Errno::last() == Errno::EINTR {
                    continue;
                }
                return Err(DaemonError::os("kevent(poll)"));
            }
            break n as usize;
        };
        for kev in raw.iter().take(n) {
            if kev.filter == libc::EVFILT_SIGNAL {
                out.push(Event::signal(kev.ident as i32));
                continue;
            }
            let fd = kev.ident as RawFd;
            let hup = kev.flags & libc::EV_EOF != 0;
            let Some(kind) = self.fds.get(&fd) else {
                continue;
            };
            out.push(Event::ready(kind_for(*kind, hup), fd));
        }
        Ok(out.len())
    }

    pub fn close(&mut self) {
        unsafe { libc::close(self.kq) };
        self.kq = -1;
        self.fds.clear();
    }
}
