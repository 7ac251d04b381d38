use crate::ipc::client::IpcClient;
use crate::Result;
use std::path::Path;

/// Start every process recorded in state.bin
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Load {}

impl Load {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let mut client = IpcClient::connect(state_dir, true)?;
        let started = client.state_load()?;
        info!("started {started} saved processes");
        println!("{started}");
        Ok(())
    }
}
