//! Integration tests for daemon provisioning and supervision.
//!
//! The generic supervision paths run against throwaway shell processes so
//! they work on any unix host. The sshd paths are skipped when the host
//! has no sshd or ssh-keygen binaries.

#![cfg(unix)]

mod common;

use std::net::TcpListener;
use std::time::Duration;

use salt_factories::daemons::{DaemonProcess, SshdConfig};
use salt_factories::error::FactoryError;
use salt_factories::skip_if_binaries_missing;

/// A process is gone once signal 0 is refused.
fn process_exists(pid: u32) -> bool {
    // SAFETY: kill with signal 0 only performs the permission check.
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

#[test]
fn fake_daemon_starts_and_terminates() {
    common::init_tracing();
    let tempdir = tempfile::tempdir().unwrap();
    let mut daemon = DaemonProcess::new(
        "sleeper",
        vec!["sleep".to_owned(), "60".to_owned()],
        tempdir.path().join("sleeper.log"),
    );

    daemon.start().unwrap();
    assert!(daemon.is_running());
    let pid = daemon.pid().unwrap();
    assert!(process_exists(pid));

    assert!(daemon.terminate().is_some());
    assert!(!daemon.is_running());
    std::thread::sleep(Duration::from_millis(100));
    assert!(!process_exists(pid));
}

#[test]
fn readiness_waits_for_the_check_ports() {
    common::init_tracing();
    let tempdir = tempfile::tempdir().unwrap();
    // The test owns the listener, so the port is connectable the moment
    // the daemon process is alive.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let mut daemon = DaemonProcess::new(
        "port-checked",
        vec!["sleep".to_owned(), "60".to_owned()],
        tempdir.path().join("port-checked.log"),
    )
    .with_check_ports(vec![port]);

    daemon.start().unwrap();
    assert!(daemon.is_running());
    daemon.terminate();
}

#[test]
fn short_lived_process_exhausts_start_attempts() {
    common::init_tracing();
    let tempdir = tempfile::tempdir().unwrap();
    let mut daemon = DaemonProcess::new(
        "short-lived",
        vec![
            "sh".to_owned(),
            "-c".to_owned(),
            "echo gone; exit 1".to_owned(),
        ],
        tempdir.path().join("short-lived.log"),
    )
    .with_check_ports(vec![1])
    .with_max_start_attempts(2)
    .with_start_timeout(Duration::from_secs(5));

    let err = daemon.start().unwrap_err();
    match err {
        FactoryError::DaemonNotStarted {
            name,
            attempts,
            output,
        } => {
            assert_eq!(name, "short-lived");
            assert_eq!(attempts, 2);
            let output = output.expect("the console log should have been captured");
            assert!(output.stdout.contains("gone"), "got {output}");
        }
        other => panic!("expected a start failure, got {other}"),
    }
}

#[test]
fn dropping_a_started_daemon_kills_the_process() {
    common::init_tracing();
    let tempdir = tempfile::tempdir().unwrap();
    let mut daemon = DaemonProcess::new(
        "dropped",
        vec!["sleep".to_owned(), "60".to_owned()],
        tempdir.path().join("dropped.log"),
    );
    daemon.start().unwrap();
    let pid = daemon.pid().unwrap();

    drop(daemon);
    std::thread::sleep(Duration::from_millis(100));
    assert!(!process_exists(pid), "pid {pid} survived the drop");
}

#[test]
fn sshd_daemon_full_lifecycle() {
    skip_if_binaries_missing!("sshd", "ssh-keygen");
    let manager = common::manager();

    // The factories root lives under /tmp, which sshd's strict paranoia
    // does not accept for config files.
    let mut config = SshdConfig::default();
    config
        .sshd_options
        .insert("StrictModes".to_owned(), "no".to_owned());

    let sshd = manager.get_sshd_daemon("sshd", config).unwrap();
    assert!(sshd.client_key().is_file());
    assert!(sshd.sshd_config_file().is_file());

    let mut sshd = sshd.started().unwrap();
    assert!(sshd.is_running());
    let connectable =
        salt_factories::ports::connectable_ports([sshd.listen_port()]);
    assert!(connectable.contains(&sshd.listen_port()));

    let pid = sshd.pid().unwrap();
    drop(sshd);
    std::thread::sleep(Duration::from_millis(200));
    assert!(!process_exists(pid), "sshd pid {pid} survived the drop");
}

#[test]
fn sshd_instances_get_isolated_config_dirs() {
    skip_if_binaries_missing!("sshd", "ssh-keygen");
    let manager = common::manager();

    let first = manager.get_sshd_daemon("sshd", SshdConfig::default()).unwrap();
    let second = manager.get_sshd_daemon("sshd", SshdConfig::default()).unwrap();
    assert_ne!(first.config_dir(), second.config_dir());
    assert_ne!(first.listen_port(), second.listen_port());
}

#[test]
fn salt_master_provisioning_writes_the_config() {
    skip_if_binaries_missing!("salt-master");
    let manager = common::manager();

    let master = manager
        .get_salt_master_daemon("master", &serde_json::Value::Null)
        .unwrap();
    let rendered = std::fs::read_to_string(master.config().conf_file.clone()).unwrap();
    assert!(rendered.contains("id: master"));
    assert!(rendered.contains("interface: 127.0.0.1"));
    assert!(master.conf_dir().ends_with("conf"));
}
