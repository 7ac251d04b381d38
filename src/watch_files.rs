//! Debounced per-process file watching.
//!
//! Each watched process owns one `WatchFiles`: a notify watcher feeding a
//! channel that is drained non-blockingly from the event loop. A restart
//! fires once a change burst has been quiet for the configured debounce
//! window, not on every event.

use crate::error::{DaemonError, DaemonResult};
use crate::logs::now_ms;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, TryRecvError};

pub struct WatchFiles {
    rx: Receiver<notify::Result<notify::Event>>,
    // kept alive for the lifetime of the watch; dropping it stops delivery
    _watcher: RecommendedWatcher,
    ignore: Vec<String>,
    delay_ms: u64,
    last_change_ms: u64,
}

impl WatchFiles {
    /// `paths` and `ignore` are the config's semicolon-separated lists. An
    /// empty path list watches the process cwd. Paths matching an ignore
    /// substring are excluded at registration; events on ignored paths are
    /// discarded too.
    pub fn setup(paths: &str, ignore: &str, delay_ms: u64, cwd: &Path) -> DaemonResult<Self> {
        let (tx, rx) = channel();
        let mut watcher =
            notify::recommended_watcher(tx).map_err(|e| DaemonError::Watch(e.to_string()))?;

        let ignore: Vec<String> = split_list(ignore);
        let mut dirs: Vec<PathBuf> = split_list(paths)
            .iter()
            .map(|p| normalize_watch_path(Path::new(p), cwd))
            .collect();
        if dirs.is_empty() {
            dirs.push(cwd.to_path_buf());
        }
        for dir in dirs {
            if is_ignored(&dir, &ignore) {
                debug!("skipping ignored watch path {}", dir.display());
                continue;
            }
            if let Err(err) = watcher.watch(&dir, RecursiveMode::Recursive) {
                warn!("cannot watch {}: {err}", dir.display());
            }
        }

        Ok(Self {
            rx,
            _watcher: watcher,
            ignore,
            delay_ms,
            last_change_ms: 0,
        })
    }

    /// Non-blocking. Drains pending events, then reports true once the
    /// debounce window has elapsed since the last observed change.
    pub fn check_for_changes(&mut self) -> bool {
        self.check_at(now_ms())
    }

    fn check_at(&mut self, now: u64) -> bool {
        let mut changed = false;
        loop {
            match self.rx.try_recv() {
                Ok(Ok(event)) => {
                    if matches!(
                        event.kind,
                        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                    ) && (event.paths.is_empty()
                        || event.paths.iter().any(|p| !is_ignored(p, &self.ignore)))
                    {
                        changed = true;
                    }
                }
                Ok(Err(err)) => debug!("watch error: {err}"),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        if changed {
            self.last_change_ms = now;
        }
        if self.last_change_ms != 0 && now.saturating_sub(self.last_change_ms) >= self.delay_ms {
            self.last_change_ms = 0;
            return true;
        }
        false
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(';')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn is_ignored(path: &Path, ignore: &[String]) -> bool {
    let path = path.to_string_lossy();
    ignore.iter().any(|pat| path.contains(pat.as_str()))
}

/// Canonicalize where possible, otherwise resolve relative to the process
/// cwd, so different spellings of the same directory deduplicate.
fn normalize_watch_path(path: &Path, cwd: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            cwd.join(path)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn drain_latency() {
        std::thread::sleep(std::time::Duration::from_millis(300));
    }

    #[test]
    fn test_change_fires_after_quiet_window() {
        let dir = TempDir::new().unwrap();
        let mut wf = WatchFiles::setup(
            dir.path().to_str().unwrap(),
            "",
            500,
            dir.path(),
        )
        .unwrap();

        fs::write(dir.path().join("file.txt"), "x").unwrap();
        drain_latency();

        let t0 = now_ms();
        assert!(!wf.check_at(t0)); // change observed, window not elapsed
        assert!(wf.check_at(t0 + 500));
        assert!(!wf.check_at(t0 + 1000)); // one-shot until the next change
    }

    #[test]
    fn test_no_change_never_fires() {
        let dir = TempDir::new().unwrap();
        let mut wf = WatchFiles::setup("", "", 100, dir.path()).unwrap();
        let t0 = now_ms();
        assert!(!wf.check_at(t0));
        assert!(!wf.check_at(t0 + 10_000));
    }

    #[test]
    fn test_ignored_paths_do_not_trigger() {
        let dir = TempDir::new().unwrap();
        let mut wf = WatchFiles::setup(
            dir.path().to_str().unwrap(),
            "node_modules;.git",
            100,
            dir.path(),
        )
        .unwrap();

        let sub = dir.path().join("node_modules");
        fs::create_dir_all(&sub).unwrap();
        drain_latency();
        let t0 = now_ms();
        wf.check_at(t0);
        fs::write(sub.join("dep.js"), "x").unwrap();
        drain_latency();
        // creation of node_modules itself may have fired once; the write
        // inside it must not re-arm the window
        let t1 = now_ms() + 60_000;
        wf.check_at(t1);
        assert!(!wf.check_at(t1 + 60_000));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(""), Vec::<String>::new());
        assert_eq!(split_list("a;b; ;c"), vec!["a", "b", "c"]);
    }
}
