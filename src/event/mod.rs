//! Platform event layer.
//!
//! One registration surface over two interchangeable backends: epoll with a
//! self-pipe for signal delivery (Linux) and kqueue with `EVFILT_SIGNAL`
//! (macOS/BSD). `poll` blocks up to a timeout and reports readable fds,
//! hangups, and signals; callers own every fd they register and must
//! `remove_fd` before closing.

use std::os::unix::io::RawFd;

#[cfg(target_os = "linux")]
mod epoll;
#[cfg(target_os = "linux")]
pub use epoll::Events;

#[cfg(not(target_os = "linux"))]
mod kqueue;
#[cfg(not(target_os = "linux"))]
pub use kqueue::Events;

/// What a registered file descriptor is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdKind {
    IpcListen,
    IpcClient,
    Pipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventKind {
    IpcAccept,
    IpcRead,
    PipeRead,
    Signal,
    Timer,
    IpcClientHup,
    PipeHup,
}

/// One ready event. `fd` is -1 for signal events, which carry the numeric
/// signal instead.
#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub kind: EventKind,
    pub fd: RawFd,
    pub signal: i32,
}

impl Event {
    pub(crate) fn ready(kind: EventKind, fd: RawFd) -> Self {
        Self {
            kind,
            fd,
            signal: 0,
        }
    }

    pub(crate) fn signal(signum: i32) -> Self {
        Self {
            kind: EventKind::Signal,
            fd: -1,
            signal: signum,
        }
    }
}

/// A readable fd at EOF maps to the matching hang-up kind so the caller
/// knows to deregister it.
pub(crate) fn kind_for(fd_kind: FdKind, hup: bool) -> EventKind {
    match (fd_kind, hup) {
        (FdKind::IpcListen, _) => EventKind::IpcAccept,
        (FdKind::IpcClient, false) => EventKind::IpcRead,
        (FdKind::IpcClient, true) => EventKind::IpcClientHup,
        (FdKind::Pipe, false) => EventKind::PipeRead,
        (FdKind::Pipe, true) => EventKind::PipeHup,
    }
}
