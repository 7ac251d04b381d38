//! Daemon loop: wires the event layer, supervisor, log collector, IPC
//! server, and persistence together and runs until told to stop.

use crate::event::{EventKind, Events, FdKind};
use crate::ipc::server::IpcServer;
use crate::logs::collector::LogCollector;
use crate::state_file::StateFile;
use crate::supervisor::Supervisor;
use crate::Result;
use std::path::Path;

const POLL_TIMEOUT_MS: i32 = 1000;

pub struct Daemon {
    events: Events,
    supervisor: Supervisor,
    collector: LogCollector,
    server: IpcServer,
    state: StateFile,
    running: bool,
}

impl Daemon {
    /// Prepare the state directory, bind the control socket, and register
    /// signals. `socket` overrides the path derived from the state dir.
    pub fn new(state_dir: &Path, socket: Option<&Path>) -> Result<Self> {
        let state = StateFile::new(state_dir);
        state.init()?;
        let socket_path = socket
            .map(Path::to_path_buf)
            .unwrap_or_else(|| state.socket_path());

        let mut events = Events::new()?;
        let collector = LogCollector::new(&state.log_dir());
        let supervisor = Supervisor::new();
        let server = IpcServer::new(&socket_path)?;
        events.add_fd(server.listen_fd(), FdKind::IpcListen)?;
        events.add_signal(libc::SIGCHLD)?;
        events.add_signal(libc::SIGTERM)?;
        events.add_signal(libc::SIGINT)?;

        Ok(Self {
            events,
            supervisor,
            collector,
            server,
            state,
            running: true,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        info!("daemon running (pid {})", std::process::id());
        let mut out = Vec::new();
        while self.running {
            if let Err(err) = self.events.poll(&mut out, Some(POLL_TIMEOUT_MS)) {
                error!("poll failed: {err}");
                continue;
            }
            for event in &out {
                match event.kind {
                    EventKind::IpcAccept => self.server.handle_accept(&mut self.events),
                    EventKind::IpcRead => self.server.handle_client_data(
                        event.fd,
                        &mut self.supervisor,
                        &mut self.collector,
                        &mut self.events,
                        &self.state,
                    ),
                    EventKind::IpcClientHup => {
                        self.server.handle_client_hup(event.fd, &mut self.events)
                    }
                    EventKind::PipeRead => {
                        self.collector.handle_pipe_data(event.fd);
                    }
                    EventKind::PipeHup => {
                        // absorb anything still buffered, then release the fd
                        while self.collector.handle_pipe_data(event.fd) {}
                        self.collector.close_pipe(event.fd, &mut self.events);
                    }
                    EventKind::Signal => self.handle_signal(event.signal),
                    EventKind::Timer => {}
                }
            }
            self.tick();
        }
        self.shutdown();
        Ok(())
    }

    /// Periodic duties, in order: kill escalations, delayed restarts, new
    /// pipe registrations, resource/watch/cron/readiness scans, and a final
    /// pipe drain for anything the scans spawned.
    fn tick(&mut self) {
        self.supervisor.check_pending_kills();
        self.supervisor
            .check_pending_restarts(&mut self.collector, &mut self.events);
        self.register_pending_pipes();
        self.supervisor
            .update_resource_usage(&mut self.collector, &mut self.events);
        self.supervisor
            .check_watchers(&mut self.collector, &mut self.events);
        self.supervisor
            .check_cron_restarts(&mut self.collector, &mut self.events);
        self.supervisor.check_wait_ready();
        self.register_pending_pipes();
        if self.server.shutdown_requested() {
            self.running = false;
        }
    }

    fn handle_signal(&mut self, signum: i32) {
        match signum {
            libc::SIGCHLD => self
                .supervisor
                .handle_sigchld(&mut self.collector, &mut self.events),
            libc::SIGTERM | libc::SIGINT => {
                info!("received signal {signum}, shutting down");
                self.running = false;
            }
            _ => debug!("ignoring signal {signum}"),
        }
    }

    fn register_pending_pipes(&mut self) {
        for fd in self.supervisor.take_pending_pipe_fds() {
            if let Err(err) = self.events.add_fd(fd, FdKind::Pipe) {
                error!("failed to register pipe fd {fd}: {err}");
            }
        }
    }

    fn shutdown(&mut self) {
        info!("stopping all processes");
        self.supervisor.stop_all();
        self.server.close(&mut self.events);
        self.events.close();
        self.state.remove_pid_file();
    }
}
