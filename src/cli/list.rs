use crate::ipc::client::IpcClient;
use crate::ui::table::{format_bytes, format_uptime, print_table};
use crate::Result;
use comfy_table::{presets, Table};
use miette::IntoDiagnostic;
use std::path::Path;

/// List all managed processes
#[derive(Debug, clap::Args)]
#[clap(visible_alias = "ls", verbatim_doc_comment)]
pub struct List {
    /// Machine-readable output
    #[clap(long)]
    json: bool,
}

impl List {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let mut client = IpcClient::connect(state_dir, false)?;
        let processes = client.list()?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&processes).into_diagnostic()?
            );
            return Ok(());
        }
        let mut table = Table::new();
        table.load_preset(presets::NOTHING);
        table.set_header(vec!["ID", "Name", "PID", "Status", "Memory", "Uptime", "Restarts"]);
        for p in &processes {
            table.add_row(vec![
                p.id.to_string(),
                p.name.clone(),
                if p.pid > 0 { p.pid.to_string() } else { "-".to_string() },
                p.status.style(),
                format_bytes(p.memory_bytes),
                format_uptime(p.uptime_ms),
                p.restart_count.to_string(),
            ]);
        }
        print_table(table)
    }
}
