use crate::cli::resolve_target;
use crate::ipc::client::IpcClient;
use crate::logs::Stream;
use crate::Result;
use chrono::{DateTime, Local};
use std::path::Path;

/// Print the most recent captured output of a process
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Logs {
    /// Process id or name
    target: String,
    /// Number of lines to show
    #[clap(long, short = 'n', default_value_t = 50)]
    lines: u32,
}

impl Logs {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let mut client = IpcClient::connect(state_dir, false)?;
        let id = resolve_target(&mut client, &self.target)?;
        for line in client.log_read(id, self.lines)? {
            let date = DateTime::from_timestamp_millis(line.timestamp_ms as i64)
                .map(|dt| {
                    dt.with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M:%S")
                        .to_string()
                })
                .unwrap_or_default();
            let message = match line.stream {
                Stream::Stdout => line.message,
                Stream::Stderr => console::style(line.message).red().to_string(),
            };
            println!("{} {message}", console::style(date).dim());
        }
        Ok(())
    }
}
