//! IPC server: accept and track clients, parse frames, dispatch commands.
//!
//! Clients speak the framed binary protocol over the control socket. Each
//! client owns an accumulating receive buffer; requests on one connection
//! are handled strictly in arrival order and the response is written before
//! the next request is parsed. A malformed header or payload terminates the
//! client; everything else is answered, errors as status=err with the
//! error's stable name.

use crate::error::{DaemonError, DaemonResult};
use crate::event::{Events, FdKind};
use crate::ipc::channel::set_nonblocking;
use crate::ipc::protocol::{
    self, Command, PayloadReader, PayloadWriter, HEADER_LEN, STATUS_ERR, STATUS_OK,
};
use crate::logs::collector::LogCollector;
use crate::logs::now_ms;
use crate::process::ProcessConfig;
use crate::state_file::StateFile;
use crate::supervisor::Supervisor;
use nix::errno::Errno;
use std::collections::HashMap;
use std::fs;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

const LISTEN_BACKLOG: i32 = 16;
const READ_CHUNK: usize = 4096;

#[derive(Debug, Default)]
struct ClientState {
    buf: Vec<u8>,
}

pub struct IpcServer {
    listen_fd: RawFd,
    socket_path: PathBuf,
    clients: HashMap<RawFd, ClientState>,
    shutdown_requested: bool,
}

impl IpcServer {
    /// Bind the control socket (mode 0600 from the start, stale file
    /// removed) and start listening.
    pub fn new(socket_path: &Path) -> DaemonResult<Self> {
        let _ = fs::remove_file(socket_path);
        let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
        if fd == -1 {
            return Err(DaemonError::os("socket"));
        }
        unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };

        let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        let path_bytes = socket_path.as_os_str().as_encoded_bytes();
        if path_bytes.len() >= addr.sun_path.len() {
            unsafe { libc::close(fd) };
            return Err(DaemonError::Os {
                op: "bind",
                errno: Errno::ENAMETOOLONG,
            });
        }
        for (dst, src) in addr.sun_path.iter_mut().zip(path_bytes) {
            *dst = *src as libc::c_char;
        }

        // restrictive umask while binding so the socket never exists with
        // looser permissions
        let old_umask = unsafe { libc::umask(0o077) };
        let rc = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_un as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t,
            )
        };
        unsafe { libc::umask(old_umask) };
        if rc == -1 {
            unsafe { libc::close(fd) };
            return Err(DaemonError::os("bind"));
        }
        if unsafe { libc::listen(fd, LISTEN_BACKLOG) } == -1 {
            unsafe { libc::close(fd) };
            return Err(DaemonError::os("listen"));
        }
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(socket_path, fs::Permissions::from_mode(0o600));
        }
        set_nonblocking(fd)?;
        info!("listening on {}", socket_path.display());
        Ok(Self {
            listen_fd: fd,
            socket_path: socket_path.to_path_buf(),
            clients: HashMap::new(),
            shutdown_requested: false,
        })
    }

    pub fn listen_fd(&self) -> RawFd {
        self.listen_fd
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn handle_accept(&mut self, events: &mut Events) {
        loop {
            let fd = unsafe {
                libc::accept(self.listen_fd, std::ptr::null_mut(), std::ptr::null_mut())
            };
            if fd == -1 {
                match Errno::last() {
                    Errno::EAGAIN => break,
                    Errno::EINTR => continue,
                    errno => {
                        debug!("accept failed: {errno}");
                        break;
                    }
                }
            }
            unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
            if set_nonblocking(fd).is_err() || events.add_fd(fd, FdKind::IpcClient).is_err() {
                unsafe { libc::close(fd) };
                continue;
            }
            trace!("client connected on fd {fd}");
            self.clients.insert(fd, ClientState::default());
        }
    }

    /// Read what is available and process every complete frame in order.
    pub fn handle_client_data(
        &mut self,
        fd: RawFd,
        supervisor: &mut Supervisor,
        collector: &mut LogCollector,
        events: &mut Events,
        state: &StateFile,
    ) {
        let mut chunk = [0u8; READ_CHUNK];
        let n = loop {
            let n =
                unsafe { libc::read(fd, chunk.as_mut_ptr() as *mut libc::c_void, chunk.len()) };
            if n >= 0 {
                break n as usize;
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::EAGAIN => return,
                errno => {
                    debug!("client read failed: {errno}");
                    self.close_client(fd, events);
                    return;
                }
            }
        };
        if n == 0 {
            self.close_client(fd, events);
            return;
        }

        let mut buf = match self.clients.get_mut(&fd) {
            Some(client) => std::mem::take(&mut client.buf),
            None => return,
        };
        buf.extend_from_slice(&chunk[..n]);

        loop {
            if buf.len() < HEADER_LEN {
                break;
            }
            let payload_len = match protocol::decode_header(&buf) {
                Ok(len) => len,
                Err(err) => {
                    debug!("dropping client on malformed frame: {err}");
                    self.close_client(fd, events);
                    return;
                }
            };
            if buf.len() < HEADER_LEN + payload_len {
                break;
            }
            let payload: Vec<u8> = buf.drain(..HEADER_LEN + payload_len).skip(HEADER_LEN).collect();
            match self.dispatch(&payload, supervisor, collector, events, state) {
                Some(response) => {
                    if let Err(err) = write_frame(fd, &response) {
                        debug!("dropping client on failed write: {err}");
                        self.close_client(fd, events);
                        return;
                    }
                }
                None => {
                    self.close_client(fd, events);
                    return;
                }
            }
        }

        if let Some(client) = self.clients.get_mut(&fd) {
            client.buf = buf;
        }
    }

    pub fn handle_client_hup(&mut self, fd: RawFd, events: &mut Events) {
        trace!("client on fd {fd} hung up");
        self.close_client(fd, events);
    }

    fn close_client(&mut self, fd: RawFd, events: &mut Events) {
        if self.clients.remove(&fd).is_some() {
            events.remove_fd(fd);
            unsafe { libc::close(fd) };
        }
    }

    /// Decode one request payload and run it. `None` terminates the client
    /// (undecodable request); anything else becomes a framed response.
    fn dispatch(
        &mut self,
        payload: &[u8],
        supervisor: &mut Supervisor,
        collector: &mut LogCollector,
        events: &mut Events,
        state: &StateFile,
    ) -> Option<Vec<u8>> {
        let request = match protocol::decode_request(payload) {
            Ok(request) => request,
            Err(err) => {
                debug!("undecodable request: {err}");
                return None;
            }
        };
        let mut r = PayloadReader::new(request.body);
        let result = match Command::from_repr(request.command) {
            None => Err("unknown command".to_string()),
            Some(command) => {
                trace!("dispatching {command} (request {})", request.id);
                match command {
                    Command::ProcessStart => {
                        run_start(&mut r, supervisor, collector, events, state)
                    }
                    Command::ProcessStop => run_stop(&mut r, supervisor, state),
                    Command::ProcessRestart => {
                        run_restart(&mut r, supervisor, collector, events)
                    }
                    Command::ProcessDelete => run_delete(&mut r, supervisor, collector, events),
                    Command::ProcessList => run_list(supervisor),
                    Command::ProcessInfo => run_info(&mut r, supervisor),
                    Command::ProcessScale => {
                        run_scale(&mut r, supervisor, collector, events, state)
                    }
                    Command::LogRead => run_log_read(&mut r, collector),
                    Command::StateSave => run_state_save(supervisor, state),
                    Command::StateLoad => {
                        run_state_load(supervisor, collector, events, state)
                    }
                    Command::Ping => Ok(b"pong".to_vec()),
                    Command::Shutdown => {
                        self.shutdown_requested = true;
                        Ok(b"shutting down".to_vec())
                    }
                }
            }
        };
        let response = match result {
            Ok(body) => protocol::encode_response(request.id, STATUS_OK, &body),
            Err(message) => {
                debug!("request {} failed: {message}", request.id);
                protocol::encode_response(request.id, STATUS_ERR, message.as_bytes())
            }
        };
        match protocol::encode_frame(&response) {
            Ok(frame) => Some(frame),
            Err(err) => {
                // response impossible to encode: drop it, keep the client
                error!("failed to encode response: {err}");
                protocol::encode_frame(&protocol::encode_response(
                    request.id,
                    STATUS_ERR,
                    b"PayloadTooLarge",
                ))
                .ok()
            }
        }
    }

    /// Close every client and the listen socket, removing the socket file.
    pub fn close(&mut self, events: &mut Events) {
        let fds: Vec<RawFd> = self.clients.keys().copied().collect();
        for fd in fds {
            self.close_client(fd, events);
        }
        if self.listen_fd >= 0 {
            events.remove_fd(self.listen_fd);
            unsafe { libc::close(self.listen_fd) };
            self.listen_fd = -1;
        }
        let _ = fs::remove_file(&self.socket_path);
    }
}

type CommandResult = Result<Vec<u8>, String>;

fn wire_err(err: DaemonError) -> String {
    err.name()
}

fn run_start(
    r: &mut PayloadReader,
    supervisor: &mut Supervisor,
    collector: &mut LogCollector,
    events: &mut Events,
    state: &StateFile,
) -> CommandResult {
    let Ok(config) = ProcessConfig::decode(r) else {
        return Err("Protocol".to_string());
    };
    let first_id = start_with_instances(config, supervisor, collector, events)
        .map_err(wire_err)?;
    autosave(supervisor, state);
    let mut w = PayloadWriter::new();
    w.u32(first_id);
    Ok(w.into_inner())
}

/// `instances > 1` fans a config out into `<name>:<k>` cluster members.
/// Returns the first spawned id.
fn start_with_instances(
    config: ProcessConfig,
    supervisor: &mut Supervisor,
    collector: &mut LogCollector,
    events: &mut Events,
) -> DaemonResult<u32> {
    let mut first_id = None;
    if config.instances <= 1 {
        let (id, stdout_fd, stderr_fd) = supervisor.start_process(config, collector)?;
        register_pipes(events, stdout_fd, stderr_fd);
        return Ok(id);
    }
    for instance in 0..config.instances {
        let mut instance_config = config.clone();
        instance_config.name = format!("{}:{instance}", config.name);
        instance_config.instance_id = instance;
        let (id, stdout_fd, stderr_fd) =
            supervisor.start_process(instance_config, collector)?;
        register_pipes(events, stdout_fd, stderr_fd);
        first_id.get_or_insert(id);
    }
    Ok(first_id.unwrap_or(0))
}

fn register_pipes(events: &mut Events, stdout_fd: RawFd, stderr_fd: RawFd) {
    for fd in [stdout_fd, stderr_fd] {
        if let Err(err) = events.add_fd(fd, FdKind::Pipe) {
            error!("failed to register pipe fd {fd}: {err}");
        }
    }
}

fn run_stop(r: &mut PayloadReader, supervisor: &mut Supervisor, state: &StateFile) -> CommandResult {
    let id = r.u32().map_err(|_| "Protocol".to_string())?;
    let signal = r.u8_or(15).map_err(|_| "Protocol".to_string())?;
    let timeout_ms = r
        .u32_or(crate::process::DEFAULT_KILL_TIMEOUT_MS)
        .map_err(|_| "Protocol".to_string())?;
    supervisor
        .stop_process(id, signal as i32, timeout_ms)
        .map_err(wire_err)?;
    autosave(supervisor, state);
    Ok(vec![])
}

fn run_restart(
    r: &mut PayloadReader,
    supervisor: &mut Supervisor,
    collector: &mut LogCollector,
    events: &mut Events,
) -> CommandResult {
    let id = r.u32().map_err(|_| "Protocol".to_string())?;
    supervisor
        .restart_process(id, collector, events)
        .map_err(wire_err)?;
    Ok(vec![])
}

fn run_delete(
    r: &mut PayloadReader,
    supervisor: &mut Supervisor,
    collector: &mut LogCollector,
    events: &mut Events,
) -> CommandResult {
    let id = r.u32().map_err(|_| "Protocol".to_string())?;
    supervisor
        .delete_process(id, collector, events)
        .map_err(wire_err)?;
    Ok(vec![])
}

fn run_list(supervisor: &Supervisor) -> CommandResult {
    let now = now_ms();
    let mut w = PayloadWriter::new();
    w.u32(supervisor.len() as u32);
    for info in supervisor.processes() {
        w.u32(info.id)
            .string(&info.name)
            .u32(info.pid)
            .u8(info.status as u8)
            .u64(info.memory_bytes)
            .u64(info.uptime_ms(now))
            .u32(info.restart_count);
    }
    Ok(w.into_inner())
}

fn run_info(r: &mut PayloadReader, supervisor: &Supervisor) -> CommandResult {
    let id = r.u32().map_err(|_| "Protocol".to_string())?;
    let info = supervisor.get(id).map_err(wire_err)?;
    let mut w = PayloadWriter::new();
    w.u32(info.id)
        .string(&info.name)
        .u32(info.pid)
        .u8(info.status as u8)
        .u64(info.memory_bytes)
        .u64(info.uptime_ms(now_ms()))
        .u32(info.restart_count)
        .u32(info.consecutive_crashes)
        .u64(info.last_restart_ms)
        .string(&info.config.script)
        .string(&info.config.cwd)
        .string(&info.config.interpreter)
        .u32(info.config.kill_timeout_ms)
        .u8(info.config.autorestart as u8)
        .i32(info.config.max_restarts)
        .u64(info.config.min_uptime_ms)
        .u32(info.config.restart_delay_ms)
        .u8(info.config.exp_backoff as u8)
        .u64(info.config.max_memory_restart)
        .u8(info.config.watch as u8)
        .string(&info.config.cron_restart)
        .u8(info.config.wait_ready as u8)
        .u8(info.config.shutdown_with_message as u8);
    Ok(w.into_inner())
}

fn run_scale(
    r: &mut PayloadReader,
    supervisor: &mut Supervisor,
    collector: &mut LogCollector,
    events: &mut Events,
    state: &StateFile,
) -> CommandResult {
    let name = r.string().map_err(|_| "Protocol".to_string())?;
    let target = r.u32().map_err(|_| "Protocol".to_string())?;
    let result = supervisor
        .scale_cluster(&name, target, collector, events)
        .map_err(wire_err)?;
    autosave(supervisor, state);
    let mut w = PayloadWriter::new();
    w.u32(result.started).u32(result.stopped);
    Ok(w.into_inner())
}

fn run_log_read(r: &mut PayloadReader, collector: &LogCollector) -> CommandResult {
    let id = r.u32().map_err(|_| "Protocol".to_string())?;
    let lines = r.u32_or(50).map_err(|_| "Protocol".to_string())?;
    let entries = collector.read_last(id, lines as usize).map_err(wire_err)?;
    let mut w = PayloadWriter::new();
    w.u32(entries.len() as u32);
    for entry in entries {
        w.u64(entry.timestamp_ms)
            .u8(entry.level as u8)
            .u8(entry.stream as u8)
            .bytes(&entry.message);
    }
    Ok(w.into_inner())
}

fn run_state_save(supervisor: &Supervisor, state: &StateFile) -> CommandResult {
    state.save(&supervisor.configs()).map_err(wire_err)?;
    Ok(b"state saved".to_vec())
}

fn run_state_load(
    supervisor: &mut Supervisor,
    collector: &mut LogCollector,
    events: &mut Events,
    state: &StateFile,
) -> CommandResult {
    let configs = state.load().map_err(wire_err)?;
    let mut started = 0u32;
    for config in configs {
        // snapshot records are per-instance already; spawn each as-is
        match supervisor.start_process(config, collector) {
            Ok((_, stdout_fd, stderr_fd)) => {
                register_pipes(events, stdout_fd, stderr_fd);
                started += 1;
            }
            Err(err) => error!("failed to start saved process: {err}"),
        }
    }
    let mut w = PayloadWriter::new();
    w.u32(started);
    Ok(w.into_inner())
}

fn autosave(supervisor: &Supervisor, state: &StateFile) {
    if let Err(err) = state.save(&supervisor.configs()) {
        warn!("autosave failed: {err}");
    }
}

/// Frame and write a response. Responses are small; EWOULDBLOCK retries
/// within the call.
fn write_frame(fd: RawFd, payload: &[u8]) -> DaemonResult<()> {
    let mut remaining = payload;
    while !remaining.is_empty() {
        let n = unsafe {
            libc::write(
                fd,
                remaining.as_ptr() as *const libc::c_void,
                remaining.len(),
            )
        };
        if n >= 0 {
            remaining = &remaining[n as usize..];
            continue;
        }
        match Errno::last() {
            Errno::EINTR | Errno::EAGAIN => continue,
            _ => return Err(DaemonError::os("client write")),
        }
    }
    Ok(())
}
