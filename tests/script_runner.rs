//! Integration tests for the script runner.
//!
//! The runner is exercised through `sh`, so everything here is unix only.
//! Exit codes pass through untouched, JSON on stdout lands in the result's
//! json field, and a run overshooting its timeout gets its process tree
//! killed.

#![cfg(unix)]

mod common;

use std::time::{Duration, Instant};

use anyhow::Result;
use rstest::rstest;
use salt_factories::error::FactoryError;
use salt_factories::process::ScriptRunner;
use serde_json::json;

fn sh() -> ScriptRunner {
    common::init_tracing();
    ScriptRunner::new("sh", Duration::from_secs(10)).expect("sh should be on PATH")
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(3)]
#[case(9)]
#[case(40)]
#[case(120)]
fn exitcodes_pass_through(#[case] exitcode: i32) {
    let result = sh().run(&["-c", &format!("exit {exitcode}")]).unwrap();
    assert_eq!(result.exitcode, exitcode);
}

#[test]
fn stdout_and_stderr_are_captured_separately() -> Result<()> {
    let result = sh().run(&["-c", "echo to-stdout; echo to-stderr >&2"])?;
    assert_eq!(result.exitcode, 0);
    assert_eq!(result.stdout, "to-stdout\n");
    assert_eq!(result.stderr, "to-stderr\n");
    Ok(())
}

#[test]
fn json_stdout_is_parsed() -> Result<()> {
    let result = sh().run(&["-c", r#"echo '{"ok": true, "value": 42}'"#])?;
    assert_eq!(result.json, Some(json!({"ok": true, "value": 42})));
    Ok(())
}

#[test]
fn plain_stdout_leaves_json_empty() {
    let result = sh().run(&["-c", "echo plain text"]).unwrap();
    assert!(result.json.is_none());
    assert_eq!(result.stdout, "plain text\n");
}

#[test]
fn base_args_come_before_run_args() {
    let runner = sh().with_base_args(vec!["-c".to_owned()]);
    let cmdline = runner.cmdline(&["echo hello"]);
    assert!(cmdline[0].ends_with("sh"));
    assert_eq!(cmdline[1], "-c");
    assert_eq!(cmdline[2], "echo hello");

    let result = runner.run(&["echo hello"]).unwrap();
    assert_eq!(result.stdout, "hello\n");
}

#[test]
fn timeout_kills_the_process_tree() {
    let started = Instant::now();
    let err = sh()
        .run_with_timeout(&["-c", "echo started; sleep 60"], Duration::from_millis(600))
        .unwrap_err();
    assert!(
        started.elapsed() < Duration::from_secs(10),
        "the runner waited out the sleep"
    );
    match err {
        FactoryError::ProcessTimeout { timeout, output, .. } => {
            assert_eq!(timeout, Duration::from_millis(600));
            assert_eq!(output.stdout, "started\n");
        }
        other => panic!("expected a timeout error, got {other}"),
    }
}

#[test]
fn missing_script_is_reported_by_name() {
    let err = ScriptRunner::new("script-that-does-not-exist", Duration::from_secs(1)).unwrap_err();
    assert_eq!(
        err.to_string(),
        "The 'script-that-does-not-exist' binary was not found"
    );
}
