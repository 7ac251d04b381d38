use crate::Result;
use std::path::{Path, PathBuf};

/// Run the daemon event loop in the foreground
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Daemon {
    /// Control socket path (defaults to <state_dir>/velos.sock)
    #[clap(long)]
    socket: Option<PathBuf>,
}

impl Daemon {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let mut daemon = crate::daemon::Daemon::new(state_dir, self.socket.as_deref())?;
        daemon.run()
    }
}
