use once_cell::sync::Lazy;
pub use std::env::*;
use std::path::PathBuf;

pub static VELOS_BIN: Lazy<PathBuf> =
    Lazy::new(|| current_exe().map(|p| p.canonicalize().unwrap_or(p)).unwrap_or_default());
pub static CWD: Lazy<PathBuf> = Lazy::new(|| current_dir().unwrap_or_default());

pub static HOME_DIR: Lazy<PathBuf> = Lazy::new(|| dirs::home_dir().unwrap_or_default());
pub static VELOS_STATE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    var_path("VELOS_STATE_DIR").unwrap_or(
        dirs::state_dir()
            .unwrap_or(HOME_DIR.join(".local").join("state"))
            .join("velos"),
    )
});
pub static VELOS_LOG: Lazy<log::LevelFilter> =
    Lazy::new(|| var_log_level("VELOS_LOG").unwrap_or(log::LevelFilter::Info));

fn var_path(name: &str) -> Option<PathBuf> {
    var(name).map(PathBuf::from).ok()
}

fn var_log_level(name: &str) -> Option<log::LevelFilter> {
    var(name).ok().and_then(|level| level.parse().ok())
}
