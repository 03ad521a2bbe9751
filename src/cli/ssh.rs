//! salt-ssh CLI factory.
//!
//! Wraps the `salt-ssh` script with the master's config dir, the roster
//! file, the client key and the remote username baked in. Results carry
//! the parsed JSON output with the target's entry unwrapped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::daemons::SaltMasterDaemon;
use crate::error::Result;
use crate::manager::ManagerOptions;
use crate::process::{ScriptRunner, ShellResult};
use crate::utils;

/// Connection settings for a salt-ssh invocation.
#[derive(Debug, Clone)]
pub struct SaltSshConfig {
    pub roster_file: PathBuf,
    pub client_key: PathBuf,
    /// Remote username. Defaults to the user running the tests.
    pub ssh_user: Option<String>,
}

impl SaltSshConfig {
    pub fn new(roster_file: impl Into<PathBuf>, client_key: impl Into<PathBuf>) -> Self {
        Self {
            roster_file: roster_file.into(),
            client_key: client_key.into(),
            ssh_user: None,
        }
    }

    pub fn with_ssh_user(mut self, ssh_user: impl Into<String>) -> Self {
        self.ssh_user = Some(ssh_user.into());
        self
    }
}

/// A ready-to-run salt-ssh invocation bound to a provisioned master.
pub struct SaltSshCli {
    runner: ScriptRunner,
    roster_file: PathBuf,
    client_key: PathBuf,
}

impl SaltSshCli {
    pub(crate) fn provision(
        master: &SaltMasterDaemon,
        config: SaltSshConfig,
        options: &ManagerOptions,
    ) -> Result<Self> {
        let ssh_user = config
            .ssh_user
            .clone()
            .unwrap_or_else(utils::running_username);
        let base_args = vec![
            format!("--config-dir={}", master.conf_dir().display()),
            format!("--roster-file={}", config.roster_file.display()),
            format!("--priv={}", config.client_key.display()),
            format!("--user={ssh_user}"),
            "--out=json".to_owned(),
            "--log-level=quiet".to_owned(),
        ];
        let mut runner =
            ScriptRunner::new("salt-ssh", options.start_timeout)?.with_base_args(base_args);
        if let Some(cwd) = &options.cwd {
            runner = runner.with_cwd(cwd.clone());
        }
        if !options.env.is_empty() {
            runner = runner.with_env(options.env.clone());
        }
        Ok(Self {
            runner,
            roster_file: config.roster_file,
            client_key: config.client_key,
        })
    }

    pub fn roster_file(&self) -> &Path {
        &self.roster_file
    }

    pub fn client_key(&self) -> &Path {
        &self.client_key
    }

    /// The full command line `run` would execute for `minion_tgt`.
    pub fn cmdline(&self, minion_tgt: &str, args: &[&str]) -> Vec<String> {
        let mut full = vec![minion_tgt];
        full.extend_from_slice(args);
        self.runner.cmdline(&full)
    }

    /// Run salt-ssh against `minion_tgt` with the default timeout.
    pub fn run(&self, minion_tgt: &str, args: &[&str]) -> Result<ShellResult> {
        let mut full = vec![minion_tgt];
        full.extend_from_slice(args);
        Ok(unwrap_target(self.runner.run(&full)?, minion_tgt))
    }

    /// Run salt-ssh against `minion_tgt`, failing if `timeout` elapses.
    pub fn run_with_timeout(
        &self,
        minion_tgt: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<ShellResult> {
        let mut full = vec![minion_tgt];
        full.extend_from_slice(args);
        Ok(unwrap_target(
            self.runner.run_with_timeout(&full, timeout)?,
            minion_tgt,
        ))
    }
}

/// Narrow the parsed JSON down to the target's return.
///
/// salt-ssh keys its JSON output by target id. A bare JSON string is an
/// error message rather than a return mapping, so it moves to stdout and
/// the json field is cleared.
fn unwrap_target(mut result: ShellResult, minion_tgt: &str) -> ShellResult {
    match result.json.take() {
        Some(Value::String(message)) => {
            result.stdout = message;
            result.json = None;
        }
        Some(Value::Object(mut map)) => {
            if let Some(target_return) = map.remove(minion_tgt) {
                result.json = Some(target_return);
            } else {
                result.json = Some(Value::Object(map));
            }
        }
        other => result.json = other,
    }
    result
}
