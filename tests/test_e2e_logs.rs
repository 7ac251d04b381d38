//! Output capture: ring buffer reads over the socket and on-disk files.

mod common;

use common::TestEnv;
use std::time::Duration;
use velos::logs::{LogLevel, Stream};

#[test]
fn test_captured_output_and_levels() {
    let env = TestEnv::new();
    let script = env.write_script(
        "chatty.sh",
        "echo hello out\necho hello err >&2\nsleep 60\n",
    );
    let mut client = env.client();
    let id = client.start(&env.shell_config("chatty", &script)).unwrap();

    assert!(env.wait_until(Duration::from_secs(5), || {
        client.log_read(id, 100).unwrap().len() >= 2
    }));
    let lines = client.log_read(id, 100).unwrap();
    let out = lines.iter().find(|l| l.stream == Stream::Stdout).unwrap();
    assert_eq!(out.message, "hello out");
    assert_eq!(out.level, LogLevel::Info);
    assert!(out.timestamp_ms > 0);
    let err = lines.iter().find(|l| l.stream == Stream::Stderr).unwrap();
    assert_eq!(err.message, "hello err");
    assert_eq!(err.level, LogLevel::Error);
}

#[test]
fn test_log_files_on_disk() {
    let env = TestEnv::new();
    let script = env.write_script("disk.sh", "echo to disk\necho oops >&2\nsleep 60\n");
    let mut client = env.client();
    client.start(&env.shell_config("disk", &script)).unwrap();

    let out_file = env.state_dir().join("logs").join("disk-out.log");
    let err_file = env.state_dir().join("logs").join("disk-err.log");
    assert!(env.wait_until(Duration::from_secs(5), || {
        out_file.exists() && err_file.exists()
    }));
    assert_eq!(std::fs::read_to_string(&out_file).unwrap(), "to disk\n");
    assert_eq!(std::fs::read_to_string(&err_file).unwrap(), "oops\n");
}

#[test]
fn test_log_read_caps_at_requested_lines() {
    let env = TestEnv::new();
    let script = env.write_script("loud.sh", "for i in 1 2 3 4 5; do echo line $i; done\nsleep 60\n");
    let mut client = env.client();
    let id = client.start(&env.shell_config("loud", &script)).unwrap();

    assert!(env.wait_until(Duration::from_secs(5), || {
        client.log_read(id, 100).unwrap().len() >= 5
    }));
    let last_two = client.log_read(id, 2).unwrap();
    assert_eq!(last_two.len(), 2);
    // newest entries, oldest first
    assert_eq!(last_two[0].message, "line 4");
    assert_eq!(last_two[1].message, "line 5");
}

#[test]
fn test_logs_survive_stop_until_delete() {
    let env = TestEnv::new();
    let script = env.write_script("brief.sh", "echo goodbye\n");
    let mut client = env.client();
    let id = client.start(&env.shell_config("brief", &script)).unwrap();

    assert!(env.wait_until(Duration::from_secs(5), || {
        !client.list().unwrap()[0].status.is_active()
    }));
    // ring contents are still addressable after exit
    let lines = client.log_read(id, 10).unwrap();
    assert_eq!(lines[0].message, "goodbye");

    client.delete(id).unwrap();
    assert_eq!(client.log_read(id, 10).unwrap_err().to_string(), "ProcessNotFound");
    // on-disk files are not deleted
    assert!(env.state_dir().join("logs").join("brief-out.log").exists());
}
