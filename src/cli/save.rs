use crate::ipc::client::IpcClient;
use crate::Result;
use std::path::Path;

/// Snapshot the process set to state.bin
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Save {}

impl Save {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let mut client = IpcClient::connect(state_dir, false)?;
        client.state_save()?;
        info!("state saved");
        Ok(())
    }
}
