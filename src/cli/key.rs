//! salt-key CLI factory.
//!
//! salt-key prints confirmation prose to stdout even when JSON output is
//! requested, so those lines are scrubbed before the output is parsed.
//! The tool takes no minion target.

use std::time::Duration;

use crate::daemons::SaltMasterDaemon;
use crate::error::Result;
use crate::manager::ManagerOptions;
use crate::process::{ProcessResult, ScriptRunner, ShellResult};

/// A ready-to-run salt-key invocation bound to a provisioned master.
pub struct SaltKeyCli {
    runner: ScriptRunner,
}

impl SaltKeyCli {
    pub(crate) fn provision(master: &SaltMasterDaemon, options: &ManagerOptions) -> Result<Self> {
        // salt-key does not grow a --log-level flag until the new logging
        // lands, so only the config dir and output format are baked in.
        let base_args = vec![
            format!("--config-dir={}", master.conf_dir().display()),
            "--out=json".to_owned(),
        ];
        let mut runner =
            ScriptRunner::new("salt-key", options.start_timeout)?.with_base_args(base_args);
        if let Some(cwd) = &options.cwd {
            runner = runner.with_cwd(cwd.clone());
        }
        if !options.env.is_empty() {
            runner = runner.with_env(options.env.clone());
        }
        Ok(Self { runner })
    }

    /// The full command line `run` would execute.
    pub fn cmdline(&self, args: &[&str]) -> Vec<String> {
        self.runner.cmdline(args)
    }

    pub fn run(&self, args: &[&str]) -> Result<ShellResult> {
        Ok(scrub_and_reparse(self.runner.run(args)?))
    }

    pub fn run_with_timeout(&self, args: &[&str], timeout: Duration) -> Result<ShellResult> {
        Ok(scrub_and_reparse(self.runner.run_with_timeout(args, timeout)?))
    }
}

/// Drop salt-key's confirmation lines from stdout and parse what remains.
fn scrub_and_reparse(result: ShellResult) -> ShellResult {
    let scrubbed = scrub_stdout(&result.stdout);
    if scrubbed == result.stdout {
        return result;
    }
    ShellResult::from_result(ProcessResult {
        exitcode: result.exitcode,
        stdout: scrubbed,
        stderr: result.stderr,
        cmdline: result.cmdline,
    })
}

fn scrub_stdout(stdout: &str) -> String {
    stdout
        .lines()
        .filter(|line| {
            let confirmation = line.starts_with("The following keys are going to be")
                && line.trim_end().ends_with(':');
            !confirmation && !line.starts_with("Key for minion")
        })
        .map(|line| format!("{line}\n"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn confirmation_lines_are_scrubbed() {
        let stdout = "The following keys are going to be accepted:\n{\"minions\": [\"one\"]}\n";
        assert_eq!(scrub_stdout(stdout), "{\"minions\": [\"one\"]}\n");
    }

    #[test]
    fn key_for_minion_lines_are_scrubbed() {
        let stdout = "Key for minion one accepted.\n{\"return\": true}\n";
        assert_eq!(scrub_stdout(stdout), "{\"return\": true}\n");
    }

    #[test]
    fn clean_output_is_untouched() {
        let stdout = "{\"local\": [\"master.pem\", \"master.pub\"]}\n";
        assert_eq!(scrub_stdout(stdout), stdout);
    }

    #[test]
    fn scrubbed_output_parses_as_json() {
        let result = scrub_and_reparse(ShellResult {
            exitcode: 0,
            stdout: "The following keys are going to be rejected:\n{\"minions\": []}\n".to_owned(),
            stderr: String::new(),
            json: None,
            cmdline: vec!["salt-key".to_owned()],
        });
        assert_eq!(result.json, Some(json!({"minions": []})));
    }
}
