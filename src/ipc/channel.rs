//! Parent-child readiness and shutdown channel.
//!
//! A unix stream socket pair created before fork. The parent end is
//! non-blocking and stays with the daemon; the child end rides across exec
//! as a decimal fd number in `VELOS_IPC_FD`. Messages on the channel are
//! u32-LE length framed, capped at 64 KiB.

use crate::error::{DaemonError, DaemonResult};
use nix::errno::Errno;
use std::os::unix::io::RawFd;

pub const ENV_FD: &str = "VELOS_IPC_FD";
pub const ENV_INSTANCE_ID: &str = "VELOS_INSTANCE_ID";
pub const ENV_NODE_APP_INSTANCE: &str = "NODE_APP_INSTANCE";
pub const MAX_MESSAGE: usize = 64 * 1024;

/// The message sent to children whose config sets `shutdown_with_message`.
pub fn shutdown_message() -> Vec<u8> {
    serde_json::json!({"type": "shutdown"}).to_string().into_bytes()
}

#[derive(Debug)]
pub struct IpcChannel {
    parent_fd: RawFd,
    child_fd: RawFd,
}

impl IpcChannel {
    pub fn new() -> DaemonResult<Self> {
        let mut fds = [0 as RawFd; 2];
        let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
        if rc == -1 {
            return Err(DaemonError::os("socketpair"));
        }
        set_nonblocking(fds[0])?;
        // the parent end must not leak into exec'd children; the child end
        // must survive exec
        unsafe { libc::fcntl(fds[0], libc::F_SETFD, libc::FD_CLOEXEC) };
        Ok(Self {
            parent_fd: fds[0],
            child_fd: fds[1],
        })
    }

    /// Child-side close of the daemon's end right after fork. The struct is
    /// a copy in the child's address space, so no state update is needed.
    pub(crate) fn close_parent_raw(&self) {
        if self.parent_fd >= 0 {
            unsafe { libc::close(self.parent_fd) };
        }
    }

    pub fn child_fd(&self) -> RawFd {
        self.child_fd
    }

    /// Send a framed message from the daemon side. Synchronous; short
    /// writes and EWOULDBLOCK retry within the call (messages are small).
    pub fn send(&self, payload: &[u8]) -> DaemonResult<()> {
        if payload.len() > MAX_MESSAGE {
            return Err(DaemonError::ChannelMessageTooLarge(payload.len()));
        }
        if self.parent_fd < 0 {
            return Err(DaemonError::Os {
                op: "channel send",
                errno: Errno::EBADF,
            });
        }
        let mut buf = Vec::with_capacity(4 + payload.len());
        buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(payload);
        write_fully(self.parent_fd, &buf)
    }

    /// Non-blocking read of one framed message from the child, if any.
    pub fn read(&self) -> Option<Vec<u8>> {
        if self.parent_fd < 0 {
            return None;
        }
        let mut len_buf = [0u8; 4];
        match read_fd(self.parent_fd, &mut len_buf[..1]) {
            Ok(0) | Err(_) => return None,
            Ok(_) => {}
        }
        // a length prefix has started arriving; finish it
        if read_exact(self.parent_fd, &mut len_buf[1..]).is_err() {
            return None;
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 || len > MAX_MESSAGE {
            return None;
        }
        let mut payload = vec![0u8; len];
        match read_exact(self.parent_fd, &mut payload) {
            Ok(()) => Some(payload),
            Err(_) => None,
        }
    }

    pub fn close_parent(&mut self) {
        if self.parent_fd >= 0 {
            unsafe { libc::close(self.parent_fd) };
            self.parent_fd = -1;
        }
    }

    pub fn close_child(&mut self) {
        if self.child_fd >= 0 {
            unsafe { libc::close(self.child_fd) };
            self.child_fd = -1;
        }
    }

    pub fn close(&mut self) {
        self.close_parent();
        self.close_child();
    }
}

pub(crate) fn set_nonblocking(fd: RawFd) -> DaemonResult<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(DaemonError::os("fcntl(F_GETFL)"));
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(DaemonError::os("fcntl(F_SETFL)"));
    }
    Ok(())
}

fn write_fully(fd: RawFd, mut buf: &[u8]) -> DaemonResult<()> {
    while !buf.is_empty() {
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n >= 0 {
            buf = &buf[n as usize..];
            continue;
        }
        match Errno::last() {
            Errno::EINTR | Errno::EAGAIN => continue,
            _ => return Err(DaemonError::os("channel write")),
        }
    }
    Ok(())
}

/// One read; 0 means no data (EOF or nothing buffered on a non-blocking fd).
fn read_fd(fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n >= 0 {
            return Ok(n as usize);
        }
        match Errno::last() {
            Errno::EINTR => continue,
            Errno::EAGAIN => return Ok(0),
            errno => return Err(errno),
        }
    }
}

/// Finish reading a frame that has started arriving; spins through
/// EWOULDBLOCK for the handful of bytes still in flight.
fn read_exact(fd: RawFd, mut buf: &mut [u8]) -> Result<(), Errno> {
    while !buf.is_empty() {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        match n {
            0 => return Err(Errno::EPIPE),
            n if n > 0 => {
                buf = &mut buf[n as usize..];
            }
            _ => match Errno::last() {
                Errno::EINTR | Errno::EAGAIN => continue,
                errno => return Err(errno),
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_frame(fd: RawFd, payload: &[u8]) {
        let mut buf = (payload.len() as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(payload);
        let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        assert_eq!(n as usize, buf.len());
    }

    #[test]
    fn test_read_returns_none_when_no_data() {
        let mut ch = IpcChannel::new().unwrap();
        assert_eq!(ch.read(), None);
        ch.close();
    }

    #[test]
    fn test_child_message_round_trip() {
        let mut ch = IpcChannel::new().unwrap();
        write_frame(ch.child_fd(), b"{\"type\":\"ready\"}");
        assert_eq!(ch.read().unwrap(), b"{\"type\":\"ready\"}");
        assert_eq!(ch.read(), None);
        ch.close();
    }

    #[test]
    fn test_send_reaches_child_end() {
        let mut ch = IpcChannel::new().unwrap();
        ch.send(&shutdown_message()).unwrap();
        let mut buf = [0u8; 64];
        let n = unsafe {
            libc::read(
                ch.child_fd(),
                buf.as_mut_ptr() as *mut libc::c_void,
                buf.len(),
            )
        };
        let msg = &buf[4..n as usize];
        assert_eq!(msg, br#"{"type":"shutdown"}"#);
        assert_eq!(&buf[..4], &(msg.len() as u32).to_le_bytes());
        ch.close();
    }

    #[test]
    fn test_oversized_message_rejected() {
        let mut ch = IpcChannel::new().unwrap();
        let big = vec![0u8; MAX_MESSAGE + 1];
        assert!(matches!(
            ch.send(&big),
            Err(DaemonError::ChannelMessageTooLarge(_))
        ));
        ch.close();
    }

    #[test]
    fn test_shutdown_message_shape() {
        assert_eq!(shutdown_message(), br#"{"type":"shutdown"}"#);
    }
}
