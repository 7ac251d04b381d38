use crate::ipc::client::IpcClient;
use crate::Result;
use std::path::Path;

/// Scale a cluster to a target instance count
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Scale {
    /// Cluster base name
    name: String,
    /// Target instance count
    target: u32,
}

impl Scale {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let mut client = IpcClient::connect(state_dir, false)?;
        let (started, stopped) = client.scale(&self.name, self.target)?;
        info!("scaled {} to {} (started {started}, stopped {stopped})", self.name, self.target);
        println!("started {started}, stopped {stopped}");
        Ok(())
    }
}
