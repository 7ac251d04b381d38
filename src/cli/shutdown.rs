use crate::ipc::client::IpcClient;
use crate::Result;
use std::path::Path;

/// Ask the daemon to stop everything and exit
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Shutdown {}

impl Shutdown {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let mut client = IpcClient::connect(state_dir, false)?;
        client.shutdown()?;
        info!("daemon shutting down");
        Ok(())
    }
}
