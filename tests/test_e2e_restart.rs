//! Restart policy: crash loops, explicit restarts, readiness timeouts.

mod common;

use common::TestEnv;
use std::time::Duration;
use velos::process_status::ProcessStatus;

#[test]
fn test_autorestart_crash_loop_ends_errored() {
    let env = TestEnv::new();
    let script = env.write_script("crash.sh", "exit 1\n");
    let mut client = env.client();

    let mut config = env.shell_config("crasher", &script);
    config.autorestart = true;
    config.max_restarts = 3;
    config.min_uptime_ms = 1000;
    config.restart_delay_ms = 100;
    let id = client.start(&config).unwrap();

    // restart deadlines are enforced at poll-timeout granularity, so give
    // the first cycle a generous window
    assert!(env.wait_until(Duration::from_secs(5), || {
        client.info(id).unwrap().restart_count >= 1
    }));

    assert!(env.wait_until(Duration::from_secs(10), || {
        client.info(id).unwrap().status == ProcessStatus::Errored
    }));
    let detail = client.info(id).unwrap();
    assert_eq!(detail.consecutive_crashes, 3);

    // no further spawns once the loop is cut off
    let restarts = detail.restart_count;
    env.sleep_ms(1000);
    assert_eq!(client.info(id).unwrap().restart_count, restarts);
}

#[test]
fn test_no_autorestart_stays_stopped() {
    let env = TestEnv::new();
    let script = env.write_script("once.sh", "exit 1\n");
    let mut client = env.client();
    let id = client.start(&env.shell_config("once", &script)).unwrap();

    assert!(env.wait_until(Duration::from_secs(5), || {
        !client.info(id).unwrap().status.is_active()
    }));
    env.sleep_ms(500);
    let detail = client.info(id).unwrap();
    assert_eq!(detail.restart_count, 0);
    // abnormal exit of a running process
    assert_eq!(detail.status, ProcessStatus::Errored);
}

#[test]
fn test_explicit_restart_changes_pid() {
    let env = TestEnv::new();
    let script = env.write_script("sleeper.sh", "sleep 60\n");
    let mut client = env.client();
    let id = client.start(&env.shell_config("svc", &script)).unwrap();

    let old_pid = client.info(id).unwrap().pid;
    client.restart(id).unwrap();

    assert!(env.wait_until(Duration::from_secs(5), || {
        let detail = client.info(id).unwrap();
        detail.status == ProcessStatus::Running && detail.pid != old_pid
    }));
    assert_eq!(client.info(id).unwrap().restart_count, 1);
}

#[test]
fn test_wait_ready_times_out_to_running() {
    let env = TestEnv::new();
    // never sends a readiness message
    let script = env.write_script("quiet.sh", "sleep 60\n");
    let mut client = env.client();

    let mut config = env.shell_config("quiet", &script);
    config.wait_ready = true;
    config.listen_timeout_ms = 1500;
    let id = client.start(&config).unwrap();

    assert_eq!(client.info(id).unwrap().status, ProcessStatus::Starting);
    assert!(env.wait_until(Duration::from_secs(5), || {
        client.info(id).unwrap().status == ProcessStatus::Running
    }));
}

#[test]
fn test_sigkill_escalation_after_timeout() {
    let env = TestEnv::new();
    // traps and survives SIGTERM
    let script = env.write_script("stubborn.sh", "trap '' TERM\nwhile true; do sleep 1; done\n");
    let mut client = env.client();
    let id = client.start(&env.shell_config("stubborn", &script)).unwrap();
    let pid = client.info(id).unwrap().pid;

    client.stop(id, 15, 1000).unwrap();
    // SIGTERM is trapped; the daemon must SIGKILL after ~1s + a poll period
    assert!(env.wait_until(Duration::from_secs(5), || {
        unsafe { libc::kill(pid as i32, 0) == -1 }
    }));
}
