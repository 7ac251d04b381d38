#[macro_use]
extern crate log;

pub mod cli;
pub mod cron;
pub mod daemon;
pub mod env;
pub mod error;
pub mod event;
pub mod ipc;
pub mod logger;
pub mod logs;
pub mod process;
pub mod process_status;
pub mod procs;
pub mod state_file;
pub mod supervisor;
pub mod ui;
pub mod watch_files;

pub use miette::Result;
