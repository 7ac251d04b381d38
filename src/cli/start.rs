use crate::env;
use crate::ipc::client::IpcClient;
use crate::process::ProcessConfig;
use crate::Result;
use std::path::Path;

/// Start a new managed process
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Start {
    /// Unique process name
    #[clap(long, short = 'n')]
    name: String,
    /// Script or executable to run
    script: String,
    /// Working directory (defaults to the current directory)
    #[clap(long)]
    cwd: Option<String>,
    /// Explicit interpreter, may include arguments (e.g. "node --inspect")
    #[clap(long)]
    interpreter: Option<String>,
    /// Restart automatically when the process exits
    #[clap(long)]
    autorestart: bool,
    /// Consecutive crashes before giving up (negative = unbounded)
    #[clap(long, default_value_t = 15)]
    max_restarts: i32,
    /// Uptime in ms below which an exit counts as a crash
    #[clap(long, default_value_t = 1000)]
    min_uptime: u64,
    /// Delay in ms before an automatic restart
    #[clap(long, default_value_t = 0)]
    restart_delay: u32,
    /// Back restart delays off exponentially
    #[clap(long)]
    exp_backoff: bool,
    /// Restart when RSS exceeds this many bytes (0 = unbounded)
    #[clap(long, default_value_t = 0)]
    max_memory: u64,
    /// Restart on file changes
    #[clap(long)]
    watch: bool,
    /// Watch debounce in ms
    #[clap(long, default_value_t = 1000)]
    watch_delay: u32,
    /// Semicolon-separated paths to watch (empty = cwd)
    #[clap(long, default_value = "")]
    watch_paths: String,
    /// Semicolon-separated ignore substrings
    #[clap(long, default_value = "")]
    watch_ignore: String,
    /// Five-field cron expression for scheduled restarts
    #[clap(long)]
    cron: Option<String>,
    /// Hold the process in `starting` until it sends a readiness message
    #[clap(long)]
    wait_ready: bool,
    /// Readiness timeout in ms
    #[clap(long, default_value_t = 8000)]
    listen_timeout: u32,
    /// Send a JSON shutdown message on the channel before signaling
    #[clap(long)]
    shutdown_with_message: bool,
    /// Cluster instance count
    #[clap(long, short = 'i', default_value_t = 1)]
    instances: u32,
    /// SIGKILL escalation timeout in ms
    #[clap(long, default_value_t = 5000)]
    kill_timeout: u32,
}

impl Start {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let config = ProcessConfig {
            name: self.name.clone(),
            script: self.script.clone(),
            cwd: self
                .cwd
                .clone()
                .unwrap_or_else(|| env::CWD.to_string_lossy().into_owned()),
            interpreter: self.interpreter.clone().unwrap_or_default(),
            kill_timeout_ms: self.kill_timeout,
            autorestart: self.autorestart,
            max_restarts: self.max_restarts,
            min_uptime_ms: self.min_uptime,
            restart_delay_ms: self.restart_delay,
            exp_backoff: self.exp_backoff,
            max_memory_restart: self.max_memory,
            watch: self.watch,
            watch_delay_ms: self.watch_delay,
            watch_paths: self.watch_paths.clone(),
            watch_ignore: self.watch_ignore.clone(),
            cron_restart: self.cron.clone().unwrap_or_default(),
            wait_ready: self.wait_ready,
            listen_timeout_ms: self.listen_timeout,
            shutdown_with_message: self.shutdown_with_message,
            instances: self.instances.max(1),
            instance_id: 0,
        };
        let mut client = IpcClient::connect(state_dir, true)?;
        let id = client.start(&config)?;
        info!("started {} with id {id}", self.name);
        println!("{id}");
        Ok(())
    }
}
