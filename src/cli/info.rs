use crate::cli::resolve_target;
use crate::ipc::client::IpcClient;
use crate::ui::table::{format_bytes, format_uptime};
use crate::Result;
use miette::IntoDiagnostic;
use std::path::Path;

/// Show everything the daemon knows about one process
#[derive(Debug, clap::Args)]
#[clap(verbatim_doc_comment)]
pub struct Info {
    /// Process id or name
    target: String,
    /// Machine-readable output
    #[clap(long)]
    json: bool,
}

impl Info {
    pub fn run(&self, state_dir: &Path) -> Result<()> {
        let mut client = IpcClient::connect(state_dir, false)?;
        let id = resolve_target(&mut client, &self.target)?;
        let detail = client.info(id)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&detail).into_diagnostic()?
            );
            return Ok(());
        }
        println!("{}", console::style(&detail.name).bold());
        println!("  id:                  {}", detail.id);
        println!("  pid:                 {}", detail.pid);
        println!("  status:              {}", detail.status.style());
        println!("  memory:              {}", format_bytes(detail.memory_bytes));
        println!("  uptime:              {}", format_uptime(detail.uptime_ms));
        println!("  restarts:            {}", detail.restart_count);
        println!("  consecutive crashes: {}", detail.consecutive_crashes);
        println!("  script:              {}", detail.script);
        println!("  cwd:                 {}", detail.cwd);
        if !detail.interpreter.is_empty() {
            println!("  interpreter:         {}", detail.interpreter);
        }
        println!("  autorestart:         {}", detail.autorestart);
        println!("  max restarts:        {}", detail.max_restarts);
        println!("  min uptime:          {}ms", detail.min_uptime_ms);
        println!("  restart delay:       {}ms", detail.restart_delay_ms);
        println!("  exp backoff:         {}", detail.exp_backoff);
        if detail.max_memory_restart > 0 {
            println!(
                "  memory limit:        {}",
                format_bytes(detail.max_memory_restart)
            );
        }
        println!("  watch:               {}", detail.watch);
        if !detail.cron_restart.is_empty() {
            println!("  cron:                {}", detail.cron_restart);
        }
        println!("  wait ready:          {}", detail.wait_ready);
        println!("  shutdown message:    {}", detail.shutdown_with_message);
        Ok(())
    }
}
