#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use velos::ipc::client::IpcClient;
use velos::process::ProcessConfig;

/// One isolated daemon per test: its own state dir, socket, and logs under
/// a tempdir, torn down (and the daemon shut down) on drop.
pub struct TestEnv {
    temp_dir: TempDir,
    daemon: Option<Child>,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("project")).unwrap();
        let mut env = Self {
            temp_dir,
            daemon: None,
        };
        env.start_daemon();
        env
    }

    pub fn state_dir(&self) -> PathBuf {
        self.temp_dir.path().join("state")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state_dir().join("velos.sock")
    }

    pub fn project_dir(&self) -> PathBuf {
        self.temp_dir.path().join("project")
    }

    fn start_daemon(&mut self) {
        let child = Command::new(env!("CARGO_BIN_EXE_velos"))
            .arg("daemon")
            .arg("--state-dir")
            .arg(self.state_dir())
            .env("VELOS_LOG", "debug")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn velos daemon");
        self.daemon = Some(child);

        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if self.socket_path().exists() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("daemon socket never appeared");
    }

    pub fn client(&self) -> IpcClient {
        IpcClient::connect(&self.state_dir(), false).expect("failed to connect to daemon")
    }

    /// Drop a shell script into the project dir, returning its path.
    pub fn write_script(&self, name: &str, contents: &str) -> String {
        let path = self.project_dir().join(name);
        fs::write(&path, contents).unwrap();
        path.to_str().unwrap().to_string()
    }

    /// Config for a script run through /bin/sh in the project dir.
    pub fn shell_config(&self, name: &str, script: &str) -> ProcessConfig {
        ProcessConfig {
            name: name.to_string(),
            script: script.to_string(),
            cwd: self.project_dir().to_str().unwrap().to_string(),
            interpreter: "/bin/sh".to_string(),
            ..Default::default()
        }
    }

    pub fn sleep_ms(&self, ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }

    /// Poll until `f` returns true; false if `timeout` elapses first.
    pub fn wait_until(&self, timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        let state_dir = self.state_dir();
        if let Some(child) = &mut self.daemon {
            if let Ok(mut client) = IpcClient::connect(&state_dir, false) {
                let _ = client.shutdown();
                std::thread::sleep(Duration::from_millis(300));
            }
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
