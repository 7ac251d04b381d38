//! epoll backend with a self-pipe for signals.
//!
//! Signal handlers are async-signal-safe: each delivery writes the signal
//! number as one byte to a non-blocking pipe whose read end is registered
//! with epoll. `poll` drains the pipe in one read and turns each byte into
//! a signal event. fds are watched level-triggered, so a bounded read per
//! event never loses data.

use super::{kind_for, Event, FdKind};
use crate::error::{DaemonError, DaemonResult};
use nix::errno::Errno;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

const MAX_EVENTS: usize = 64;

/// Write end of the signal self-pipe, reachable from the handler.
static SIGNAL_PIPE_WR: AtomicI32 = AtomicI32::new(-1);

extern "C" fn forward_signal(signum: libc::c_int) {
    let fd = SIGNAL_PIPE_WR.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = [signum as u8];
        unsafe { libc::write(fd, byte.as_ptr() as *const libc::c_void, 1) };
    }
}

pub struct Events {
    epfd: RawFd,
    fds: HashMap<RawFd, FdKind>,
    signal_rd: RawFd,
    signal_wr: RawFd,
}

impl Events {
    pub fn new() -> DaemonResult<Self> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd == -1 {
            return Err(DaemonError::os("epoll_create1"));
        }
        let mut pipe_fds = [0 as RawFd; 2];
        if unsafe { libc::pipe2(pipe_fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } == -1
        {
            unsafe { libc::close(epfd) };
            return Err(DaemonError::os("pipe2"));
        }
        let events = Self {
            epfd,
            fds: HashMap::new(),
            signal_rd: pipe_fds[0],
            signal_wr: pipe_fds[1],
        };
        events.epoll_add(events.signal_rd)?;
        SIGNAL_PIPE_WR.store(events.signal_wr, Ordering::Relaxed);
        Ok(events)
    }

    fn epoll_add(&self, fd: RawFd) -> DaemonResult<()> {
        let mut ev = libc::epoll_event {
            events: (libc::EPOLLIN | libc::EPOLLRDHUP) as u32,
            u64: fd as u64,
        };
        if unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, &mut ev) } == -1 {
            return Err(DaemonError::os("epoll_ctl(ADD)"));
        }
        Ok(())
    }

    pub fn add_fd(&mut self, fd: RawFd, kind: FdKind) -> DaemonResult<()> {
        self.epoll_add(fd)?;
        self.fds.insert(fd, kind);
        Ok(())
    }

    /// Removing an fd that was never registered (or already closed) is a
    /// no-op.
    pub fn remove_fd(&mut self, fd: RawFd) {
        self.fds.remove(&fd);
        let mut ev = libc::epoll_event { events: 0, u64: 0 };
        unsafe { libc::epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, &mut ev) };
    }

    pub fn add_signal(&mut self, signum: i32) -> DaemonResult<()> {
        let handler: extern "C" fn(libc::c_int) = forward_signal;
        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = handler as usize;
            sa.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut sa.sa_mask);
            if libc::sigaction(signum, &sa, std::ptr::null_mut()) == -1 {
                return Err(DaemonError::os("sigaction"));
            }
        }
        Ok(())
    }

    /// Block up to `timeout_ms` (`None` = indefinitely, 0 = non-blocking)
    /// and fill `out` with ready events, returning the count.
    pub fn poll(&mut self, out: &mut Vec<Event>, timeout_ms: Option<i32>) -> DaemonResult<usize> {
        out.clear();
        let mut raw: [libc::epoll_event; MAX_EVENTS] = unsafe { std::mem::zeroed() };
        let n = loop {
            let n = unsafe {
                libc::epoll_wait(
                    self.epfd,
                    raw.as_mut_ptr(),
                    MAX_EVENTS as i32,
                    timeout_ms.unwrap_or(-1),
                )
            };
            if n == -1 {
                // our own handlers interrupt epoll_wait; the self-pipe has
                // the data, so just wait again
                if Errno::last() == Errno::EINTR {
                    continue;
                }
                return Err(DaemonError::os("epoll_wait"));
            }
            break n as usize;
        };
        for ev in raw.iter().take(n) {
            let fd = ev.u64 as RawFd;
            if fd == self.signal_rd {
                self.drain_signals(out);
                continue;
            }
            let hup = ev.events & (libc::EPOLLHUP | libc::EPOLLRDHUP) as u32 != 0;
            let Some(kind) = self.fds.get(&fd) else {
                continue; // raced with remove_fd
            };
            out.push(Event::ready(kind_for(*kind, hup), fd));
        }
        Ok(out.len())
    }

    fn drain_signals(&self, out: &mut Vec<Event>) {
        let mut buf = [0u8; 64];
        let n = unsafe {
            libc::read(
                self.signal_rd,
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        if n > 0 {
            for byte in &buf[..n as usize] {
                out.push(Event::signal(*byte as i32));
            }
        }
    }

    pub fn close(&mut self) {
        SIGNAL_PIPE_WR.store(-1, Ordering::Relaxed);
        unsafe {
            libc::close(self.signal_rd);
            libc::close(self.signal_wr);
            libc::close(self.epfd);
        }
        self.epfd = -1;
        self.fds.clear();
    }
}
