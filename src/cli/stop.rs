use crate::cli::resolve_target;
use crate::ipc::client::IpcClient;
use crate::Result;
use std::path::Path;

/// Stop a running process without removing it
#[derive(Debug, clap::Args)]
#[clap(visible_alias = "kill", verbatim_doc_comment)]
pub struct Stop {
    /// Process id or name
    target: String,
    /// Signal to send first
    #[clap(long, default_value_t = 15)]
    signal: u8,
    /// SIGKILL escalation timeout in ms
    #[clap(long, default_value_t = 5000)]
    timeout: u32,
}

impl Stop {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let mut client = IpcClient::connect(state_dir, false)?;
        let id = resolve_target(&mut client, &self.target)?;
        client.stop(id, self.signal, self.timeout)?;
        info!("stopped {}", self.target);
        Ok(())
    }
}
