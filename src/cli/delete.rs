use crate::cli::resolve_target;
use crate::ipc::client::IpcClient;
use crate::Result;
use std::path::Path;

/// Stop a process and remove it from the daemon
#[derive(Debug, clap::Args)]
#[clap(visible_alias = "rm", verbatim_doc_comment)]
pub struct Delete {
    /// Process id or name
    target: String,
}

impl Delete {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let mut client = IpcClient::connect(state_dir, false)?;
        let id = resolve_target(&mut client, &self.target)?;
        client.delete(id)?;
        info!("deleted {}", self.target);
        Ok(())
    }
}
