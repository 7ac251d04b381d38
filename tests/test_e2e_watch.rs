//! Watch-driven restarts.

mod common;

use common::TestEnv;
use std::time::Duration;

#[test]
fn test_file_change_restarts_process() {
    let env = TestEnv::new();
    let script = env.write_script("sleeper.sh", "sleep 120\n");
    let watched = env.project_dir().join("src");
    std::fs::create_dir_all(&watched).unwrap();
    let mut client = env.client();

    let mut config = env.shell_config("watched", &script);
    config.watch = true;
    config.watch_paths = watched.to_str().unwrap().to_string();
    config.watch_delay_ms = 500;
    let id = client.start(&config).unwrap();
    let old_pid = client.info(id).unwrap().pid;

    // let the watcher settle before producing the change
    env.sleep_ms(300);
    std::fs::write(watched.join("main.rs"), "fn main() {}\n").unwrap();

    assert!(env.wait_until(Duration::from_secs(6), || {
        let detail = client.info(id).unwrap();
        detail.status.is_active() && detail.pid != old_pid
    }));
    assert!(client.info(id).unwrap().restart_count >= 1);
}

#[test]
fn test_ignored_paths_do_not_restart() {
    let env = TestEnv::new();
    let script = env.write_script("sleeper.sh", "sleep 120\n");
    let watched = env.project_dir().join("app");
    std::fs::create_dir_all(watched.join("node_modules")).unwrap();
    let mut client = env.client();

    let mut config = env.shell_config("steady", &script);
    config.watch = true;
    config.watch_paths = watched.to_str().unwrap().to_string();
    config.watch_ignore = "node_modules".to_string();
    config.watch_delay_ms = 200;
    let id = client.start(&config).unwrap();
    let old_pid = client.info(id).unwrap().pid;

    env.sleep_ms(300);
    std::fs::write(watched.join("node_modules").join("scratch"), "x").unwrap();
    env.sleep_ms(2000);
    assert_eq!(client.info(id).unwrap().pid, old_pid);
    assert_eq!(client.info(id).unwrap().restart_count, 0);
}
