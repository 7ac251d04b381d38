use crate::cli::resolve_target;
use crate::ipc::client::IpcClient;
use crate::Result;
use std::path::Path;

/// Restart a process, keeping its id and config
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Restart {
    /// Process id or name
    target: String,
}

impl Restart {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let mut client = IpcClient::connect(state_dir, false)?;
        let id = resolve_target(&mut client, &self.target)?;
        client.restart(id)?;
        info!("restarted {}", self.target);
        Ok(())
    }
}
