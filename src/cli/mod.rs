use crate::env;
use crate::error::find_similar_process;
use crate::ipc::client::IpcClient;
use crate::Result;
use clap::Parser;
use miette::miette;
use std::path::PathBuf;

mod daemon;
mod delete;
mod info;
mod list;
mod load;
mod logs;
mod ping;
mod restart;
mod save;
mod scale;
mod shutdown;
mod start;
mod stop;

#[derive(Debug, clap::Parser)]
#[clap(name = "velos", version, about = "Single-host process manager")]
struct Cli {
    /// State directory (control socket, pid file, logs, snapshots)
    #[clap(long, global = true, env = "VELOS_STATE_DIR")]
    state_dir: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    Daemon(daemon::Daemon),
    Start(start::Start),
    Stop(stop::Stop),
    Restart(restart::Restart),
    Delete(delete::Delete),
    List(list::List),
    Info(info::Info),
    Logs(logs::Logs),
    Scale(scale::Scale),
    Save(save::Save),
    Load(load::Load),
    Ping(ping::Ping),
    Shutdown(shutdown::Shutdown),
}

pub fn run() -> Result<()> {
    let args = Cli::parse();
    let state_dir = args
        .state_dir
        .unwrap_or_else(|| env::VELOS_STATE_DIR.clone());
    match args.command {
        Command::Daemon(cmd) => cmd.run(&state_dir),
        Command::Start(cmd) => cmd.run(&state_dir),
        Command::Stop(cmd) => cmd.run(&state_dir),
        Command::Restart(cmd) => cmd.run(&state_dir),
        Command::Delete(cmd) => cmd.run(&state_dir),
        Command::List(cmd) => cmd.run(&state_dir),
        Command::Info(cmd) => cmd.run(&state_dir),
        Command::Logs(cmd) => cmd.run(&state_dir),
        Command::Scale(cmd) => cmd.run(&state_dir),
        Command::Save(cmd) => cmd.run(&state_dir),
        Command::Load(cmd) => cmd.run(&state_dir),
        Command::Ping(cmd) => cmd.run(&state_dir),
        Command::Shutdown(cmd) => cmd.run(&state_dir),
    }
}

/// Commands address processes by id or name; names resolve through a list
/// round trip.
pub(crate) fn resolve_target(client: &mut IpcClient, target: &str) -> Result<u32> {
    if let Ok(id) = target.parse::<u32>() {
        return Ok(id);
    }
    let processes = client.list()?;
    if let Some(process) = processes.iter().find(|p| p.name == target) {
        return Ok(process.id);
    }
    let suggestion = find_similar_process(target, processes.iter().map(|p| p.name.as_str()));
    match suggestion {
        Some(suggestion) => Err(miette!(help = suggestion, "no process named '{target}'")),
        None => Err(miette!("no process named '{target}'")),
    }
}
