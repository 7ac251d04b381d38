//! End-to-end tests over the real socket: framing, the basic lifecycle,
//! and state snapshots.

mod common;

use common::TestEnv;
use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;
use velos::process_status::ProcessStatus;

#[test]
fn test_ping_raw_frame() {
    let env = TestEnv::new();
    let mut stream = UnixStream::connect(env.socket_path()).unwrap();

    // magic, version, len=5 | id=1, command=ping
    let frame: [u8; 12] = [
        0x56, 0x10, 0x01, 0x05, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x40,
    ];
    stream.write_all(&frame).unwrap();

    let mut header = [0u8; 7];
    stream.read_exact(&mut header).unwrap();
    assert_eq!(&header[..3], &[0x56, 0x10, 0x01]);
    let len = u32::from_le_bytes([header[3], header[4], header[5], header[6]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).unwrap();
    assert_eq!(payload, [0x01, 0x00, 0x00, 0x00, 0x00, b'p', b'o', b'n', b'g']);
}

#[test]
fn test_ping_via_client() {
    let env = TestEnv::new();
    assert_eq!(env.client().ping().unwrap(), "pong");
}

#[test]
fn test_start_list_stop_delete() {
    let env = TestEnv::new();
    let script = env.write_script("sleeper.sh", "sleep 60\n");
    let mut client = env.client();

    let id = client.start(&env.shell_config("test", &script)).unwrap();
    assert_eq!(id, 1);

    let processes = client.list().unwrap();
    assert_eq!(processes.len(), 1);
    assert_eq!(processes[0].name, "test");
    assert_eq!(processes[0].status, ProcessStatus::Running);
    assert!(processes[0].pid > 0);

    client.stop(id, 15, 5000).unwrap();
    env.sleep_ms(100);
    let processes = client.list().unwrap();
    assert!(matches!(
        processes[0].status,
        ProcessStatus::Stopped | ProcessStatus::Errored
    ));

    client.delete(id).unwrap();
    assert_eq!(client.list().unwrap().len(), 0);
}

#[test]
fn test_stop_of_stopped_process_is_noop() {
    let env = TestEnv::new();
    let script = env.write_script("quick.sh", "true\n");
    let mut client = env.client();
    let id = client.start(&env.shell_config("quick", &script)).unwrap();
    // exits immediately; wait for the reap
    assert!(env.wait_until(Duration::from_secs(5), || {
        client.list().unwrap()[0].status == ProcessStatus::Stopped
    }));
    client.stop(id, 15, 1000).unwrap();
}

#[test]
fn test_unknown_id_is_process_not_found() {
    let env = TestEnv::new();
    let mut client = env.client();
    let err = client.stop(99, 15, 1000).unwrap_err();
    assert_eq!(err.to_string(), "ProcessNotFound");
    let err = client.info(99).unwrap_err();
    assert_eq!(err.to_string(), "ProcessNotFound");
    let err = client.log_read(99, 10).unwrap_err();
    assert_eq!(err.to_string(), "ProcessNotFound");
}

#[test]
fn test_ids_are_never_reused() {
    let env = TestEnv::new();
    let script = env.write_script("sleeper.sh", "sleep 60\n");
    let mut client = env.client();
    let first = client.start(&env.shell_config("a", &script)).unwrap();
    client.delete(first).unwrap();
    let second = client.start(&env.shell_config("b", &script)).unwrap();
    assert!(second > first);
}

#[test]
fn test_request_ordering_on_one_connection() {
    let env = TestEnv::new();
    let mut stream = UnixStream::connect(env.socket_path()).unwrap();

    // two pings back to back in a single write; responses must come back
    // in request order
    let mut frames = Vec::new();
    for id in [7u32, 8u32] {
        frames.extend_from_slice(&[0x56, 0x10, 0x01, 0x05, 0x00, 0x00, 0x00]);
        frames.extend_from_slice(&id.to_le_bytes());
        frames.push(0x40);
    }
    stream.write_all(&frames).unwrap();

    for expected_id in [7u32, 8u32] {
        let mut header = [0u8; 7];
        stream.read_exact(&mut header).unwrap();
        let len = u32::from_le_bytes([header[3], header[4], header[5], header[6]]) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).unwrap();
        assert_eq!(&payload[..4], &expected_id.to_le_bytes());
    }
}

#[test]
fn test_save_and_restore() {
    let env = TestEnv::new();
    let script = env.write_script("sleeper.sh", "sleep 60\n");
    let mut client = env.client();

    let mut first = env.shell_config("alpha", &script);
    first.autorestart = true;
    first.max_restarts = 7;
    first.exp_backoff = true;
    let mut second = env.shell_config("beta", &script);
    second.cron_restart = "0 4 * * *".to_string();
    second.max_memory_restart = 256 * 1024 * 1024;
    let third = env.shell_config("gamma", &script);

    for config in [&first, &second, &third] {
        client.start(config).unwrap();
    }
    client.state_save().unwrap();
    for id in [1, 2, 3] {
        client.delete(id).unwrap();
    }
    assert_eq!(client.list().unwrap().len(), 0);

    assert_eq!(client.state_load().unwrap(), 3);
    let processes = client.list().unwrap();
    assert_eq!(processes.len(), 3);

    let alpha = processes.iter().find(|p| p.name == "alpha").unwrap();
    let detail = client.info(alpha.id).unwrap();
    assert_eq!(detail.script, script);
    assert_eq!(detail.interpreter, "/bin/sh");
    assert!(detail.autorestart);
    assert_eq!(detail.max_restarts, 7);
    assert!(detail.exp_backoff);

    let beta = processes.iter().find(|p| p.name == "beta").unwrap();
    let detail = client.info(beta.id).unwrap();
    assert_eq!(detail.cron_restart, "0 4 * * *");
    assert_eq!(detail.max_memory_restart, 256 * 1024 * 1024);

    // runtime counters regenerate rather than restore
    assert_eq!(detail.restart_count, 0);
}

#[test]
fn test_pid_file_exists_while_running() {
    let env = TestEnv::new();
    let pid_file = env.state_dir().join("velos.pid");
    let contents = std::fs::read_to_string(&pid_file).unwrap();
    assert!(contents.ends_with('\n'));
    let pid: u32 = contents.trim().parse().unwrap();
    assert!(pid > 0);
}
