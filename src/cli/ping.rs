use crate::ipc::client::IpcClient;
use crate::Result;
use std::path::Path;

/// Check that the daemon is alive
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Ping {}

impl Ping {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let mut client = IpcClient::connect(state_dir, false)?;
        println!("{}", client.ping()?);
        Ok(())
    }
}
