//! Child process plumbing shared by the daemon factories and the CLI
//! helpers.
//!
//! On Unix systems every spawned process becomes the leader of its own
//! process group (via `setsid()`) so the whole process tree can be signalled
//! when a daemon is stopped or a CLI run exceeds its timeout. Daemon output
//! is redirected to a log file; CLI output is captured through pipes while
//! the caller waits.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{FactoryError, Result};

/// How often a waiting loop polls a child for exit.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured output of a finished process.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub exitcode: i32,
    pub stdout: String,
    pub stderr: String,
    pub cmdline: Vec<String>,
}

impl fmt::Display for ProcessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProcessResult\n Command Line: {:?}\n Exitcode: {}",
            self.cmdline, self.exitcode
        )?;
        if !self.stdout.is_empty() || !self.stderr.is_empty() {
            write!(f, "\n Process Output:")?;
            if !self.stdout.is_empty() {
                write!(
                    f,
                    "\n   >>>>> STDOUT >>>>>\n{}\n   <<<<< STDOUT <<<<<",
                    self.stdout
                )?;
            }
            if !self.stderr.is_empty() {
                write!(
                    f,
                    "\n   >>>>> STDERR >>>>>\n{}\n   <<<<< STDERR <<<<<",
                    self.stderr
                )?;
            }
        }
        writeln!(f)
    }
}

/// [`ProcessResult`] plus the JSON document parsed from stdout, when stdout
/// holds one.
#[derive(Debug, Clone)]
pub struct ShellResult {
    pub exitcode: i32,
    pub stdout: String,
    pub stderr: String,
    pub json: Option<Value>,
    pub cmdline: Vec<String>,
}

impl ShellResult {
    pub(crate) fn from_result(result: ProcessResult) -> Self {
        let json = match serde_json::from_str(&result.stdout) {
            Ok(json) => Some(json),
            Err(err) => {
                debug!(
                    "Failed to load JSON from the following output:\n{:?}\n{err}",
                    result.stdout
                );
                None
            }
        };
        Self {
            exitcode: result.exitcode,
            stdout: result.stdout,
            stderr: result.stderr,
            json,
            cmdline: result.cmdline,
        }
    }
}

impl fmt::Display for ShellResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ShellResult\n Command Line: {:?}\n Exitcode: {}",
            self.cmdline, self.exitcode
        )?;
        if let Some(json) = &self.json {
            write!(f, "\n JSON Object:\n{json:#}")?;
        }
        if !self.stdout.is_empty() || !self.stderr.is_empty() {
            write!(f, "\n Process Output:")?;
            if !self.stdout.is_empty() {
                write!(
                    f,
                    "\n   >>>>> STDOUT >>>>>\n{}\n   <<<<< STDOUT <<<<<",
                    self.stdout
                )?;
            }
            if !self.stderr.is_empty() {
                write!(
                    f,
                    "\n   >>>>> STDERR >>>>>\n{}\n   <<<<< STDERR <<<<<",
                    self.stderr
                )?;
            }
        }
        writeln!(f)
    }
}

/// Spawn `cmdline` with stdout and stderr combined into `log_path`.
///
/// The log file's parent directory is created if needed. On Unix the child
/// becomes a process group leader.
pub(crate) fn spawn_to_log_file(
    cmdline: &[String],
    cwd: Option<&Path>,
    env: &[(String, String)],
    log_path: &Path,
) -> Result<Child> {
    let (program, args) = split_cmdline(cmdline)?;

    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log_file = File::create(log_path)?;
    let log_file_stderr = log_file.try_clone()?;

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_stderr));
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    for (key, value) in env {
        cmd.env(key, value);
    }
    new_process_group(&mut cmd);

    cmd.spawn().map_err(|err| {
        FactoryError::Io(std::io::Error::new(
            err.kind(),
            format!("Failed to spawn '{program}': {err}"),
        ))
    })
}

/// Run a short provisioning command to completion, failing when it exits
/// non-zero. Used for key generation and similar setup steps.
pub(crate) fn run_command(cmdline: &[String], cwd: Option<&Path>) -> Result<ProcessResult> {
    let (program, args) = split_cmdline(cmdline)?;

    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null());
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    let output = cmd.output().map_err(|err| {
        FactoryError::Io(std::io::Error::new(
            err.kind(),
            format!("Failed to run '{program}': {err}"),
        ))
    })?;

    let result = ProcessResult {
        exitcode: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        cmdline: cmdline.to_vec(),
    };
    if result.exitcode != 0 {
        return Err(FactoryError::CommandFailed {
            cmdline: cmdline.join(" "),
            exitcode: result.exitcode,
            stderr: result.stderr,
        });
    }
    Ok(result)
}

fn split_cmdline(cmdline: &[String]) -> Result<(&String, &[String])> {
    cmdline.split_first().ok_or_else(|| {
        FactoryError::InvalidArgument("Cannot spawn an empty command line".to_owned())
    })
}

#[cfg(unix)]
fn new_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;

    // SAFETY: setsid() is safe to call in pre_exec - it creates a new session
    // and process group, making this process the leader.
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn new_process_group(_cmd: &mut Command) {}

/// Send SIGTERM to the child's process group, giving it a chance to shut
/// down cleanly. No-op on Windows, where [`kill_process_tree`] is the only
/// stop mechanism.
pub(crate) fn terminate_process_group(pid: u32) {
    #[cfg(unix)]
    {
        let pid = pid as i32;
        // SAFETY: libc::kill with negative pid is safe, just sends signal
        // to the process group.
        unsafe {
            libc::kill(-pid, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kill the child and its whole process tree.
///
/// On Unix, SIGKILL goes to the process group (negative pid, valid because
/// the child was made a group leader at spawn). On Windows, `taskkill /T`
/// takes the tree down.
pub(crate) fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let pid = child.id() as i32;
        // SAFETY: libc::kill with negative pid is safe, just sends signal
        // to the process group.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
        let _ = child.kill();
    }
    #[cfg(not(unix))]
    {
        let _ = Command::new("taskkill")
            .args(["/PID", &child.id().to_string(), "/T", "/F"])
            .output();
        let _ = child.kill();
    }
}

/// Poll `child` until it exits or `deadline` passes.
///
/// Returns the exit status when the process finished in time, `None` on
/// deadline.
pub(crate) fn wait_until(child: &mut Child, deadline: Instant) -> Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

/// Runs a console script and captures its output.
///
/// The program is resolved on `PATH` up front. Every [`run`](Self::run)
/// spawns a fresh process in its own process group, waits up to the
/// configured timeout, and kills the whole tree when the timeout is
/// reached.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    program: PathBuf,
    base_args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Duration,
}

impl ScriptRunner {
    /// Resolve `script_name` on `PATH` and build a runner with no base
    /// arguments and the given default timeout.
    ///
    /// # Errors
    ///
    /// [`FactoryError::BinaryNotFound`] when the script is not on `PATH`.
    pub fn new(script_name: &str, timeout: Duration) -> Result<Self> {
        let program = which::which(script_name)
            .map_err(|_| FactoryError::BinaryNotFound(script_name.to_owned()))?;
        Ok(Self {
            program,
            base_args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            timeout,
        })
    }

    /// Arguments placed before the per-run arguments on every invocation.
    pub fn with_base_args(mut self, base_args: Vec<String>) -> Self {
        self.base_args = base_args;
        self
    }

    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The full command line `run` would execute for `args`.
    pub fn cmdline(&self, args: &[&str]) -> Vec<String> {
        let mut cmdline = vec![self.program.display().to_string()];
        cmdline.extend(self.base_args.iter().cloned());
        cmdline.extend(args.iter().map(|arg| (*arg).to_owned()));
        cmdline
    }

    /// Run with the default timeout.
    pub fn run(&self, args: &[&str]) -> Result<ShellResult> {
        self.run_with_timeout(args, self.timeout)
    }

    /// Run `args`, killing the process tree if it does not finish within
    /// `timeout`.
    ///
    /// # Returns
    ///
    /// The [`ShellResult`] of the finished process; the exit code is passed
    /// through untouched, success is the caller's call to make.
    pub fn run_with_timeout(&self, args: &[&str], timeout: Duration) -> Result<ShellResult> {
        let cmdline = self.cmdline(args);
        let start = Instant::now();
        info!(
            "Running '{}' with a timeout of {timeout:?}",
            cmdline.join(" ")
        );

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        new_process_group(&mut cmd);

        let mut child = cmd.spawn().map_err(|err| {
            FactoryError::Io(std::io::Error::new(
                err.kind(),
                format!("Failed to spawn '{}': {err}", self.program.display()),
            ))
        })?;

        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        match wait_until(&mut child, start + timeout)? {
            Some(status) => {
                let stdout = join_pipe_reader(stdout_reader);
                let stderr = join_pipe_reader(stderr_reader);
                let exitcode = status.code().unwrap_or(-1);
                info!(
                    "'{}' completed with exitcode {exitcode} after {:.2?}",
                    cmdline.join(" "),
                    start.elapsed()
                );
                Ok(ShellResult::from_result(ProcessResult {
                    exitcode,
                    stdout,
                    stderr,
                    cmdline,
                }))
            }
            None => {
                warn!(
                    "'{}' did not complete within {timeout:?}, killing it",
                    cmdline.join(" ")
                );
                kill_process_tree(&mut child);
                let exitcode = child.wait().ok().and_then(|status| status.code()).unwrap_or(-1);
                let stdout = join_pipe_reader(stdout_reader);
                let stderr = join_pipe_reader(stderr_reader);
                Err(FactoryError::ProcessTimeout {
                    cmdline: cmdline.join(" "),
                    timeout,
                    output: ProcessResult {
                        exitcode,
                        stdout,
                        stderr,
                        cmdline,
                    },
                })
            }
        }
    }
}

fn spawn_pipe_reader<R: Read + Send + 'static>(pipe: Option<R>) -> Option<thread::JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = String::new();
            let _ = pipe.read_to_string(&mut buffer);
            buffer
        })
    })
}

fn join_pipe_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_result_parses_json_stdout() {
        let shell = ShellResult::from_result(ProcessResult {
            exitcode: 0,
            stdout: r#"{"color": "green", "amount": 1}"#.to_owned(),
            stderr: String::new(),
            cmdline: vec!["some-program".to_owned()],
        });
        assert_eq!(shell.json.as_ref().unwrap()["color"], "green");
        assert_eq!(shell.json.as_ref().unwrap()["amount"], 1);
    }

    #[test]
    fn shell_result_json_is_none_for_plain_output() {
        let shell = ShellResult::from_result(ProcessResult {
            exitcode: 0,
            stdout: "this is not json".to_owned(),
            stderr: String::new(),
            cmdline: vec!["some-program".to_owned()],
        });
        assert!(shell.json.is_none());
    }

    #[test]
    fn process_result_display_carries_both_streams() {
        let result = ProcessResult {
            exitcode: 2,
            stdout: "out".to_owned(),
            stderr: "err".to_owned(),
            cmdline: vec!["prog".to_owned(), "--flag".to_owned()],
        };
        let rendered = result.to_string();
        assert!(rendered.contains("Exitcode: 2"));
        assert!(rendered.contains(">>>>> STDOUT >>>>>\nout"));
        assert!(rendered.contains(">>>>> STDERR >>>>>\nerr"));
    }

    #[test]
    fn missing_binary_is_reported() {
        let err = ScriptRunner::new("binary-that-does-not-exist-9", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, FactoryError::BinaryNotFound(_)));
        assert_eq!(
            err.to_string(),
            "The 'binary-that-does-not-exist-9' binary was not found"
        );
    }

    #[cfg(unix)]
    #[test]
    fn run_captures_exitcode_and_output() {
        let runner = ScriptRunner::new("sh", Duration::from_secs(10)).unwrap();
        let ret = runner
            .run(&["-c", "echo hello; echo oops >&2; exit 3"])
            .unwrap();
        assert_eq!(ret.exitcode, 3, "{ret}");
        assert_eq!(ret.stdout, "hello\n");
        assert_eq!(ret.stderr, "oops\n");
        assert!(ret.json.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn run_parses_json_output() {
        let runner = ScriptRunner::new("sh", Duration::from_secs(10)).unwrap();
        let ret = runner.run(&["-c", r#"echo '{"it": "works"}'"#]).unwrap();
        assert_eq!(ret.exitcode, 0, "{ret}");
        assert_eq!(ret.json.unwrap()["it"], "works");
    }

    #[cfg(unix)]
    #[test]
    fn run_times_out_and_kills_the_tree() {
        let runner = ScriptRunner::new("sh", Duration::from_secs(10)).unwrap();
        let start = Instant::now();
        let err = runner
            .run_with_timeout(&["-c", "sleep 30"], Duration::from_millis(300))
            .unwrap_err();
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "timeout kill took {:?}",
            start.elapsed()
        );
        match err {
            FactoryError::ProcessTimeout { timeout, .. } => {
                assert_eq!(timeout, Duration::from_millis(300));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn base_args_come_before_run_args() {
        let runner = ScriptRunner::new("sh", Duration::from_secs(10))
            .unwrap()
            .with_base_args(vec!["-c".to_owned()]);
        let ret = runner.run(&["echo base"]).unwrap();
        assert_eq!(ret.stdout, "base\n");
    }

    #[cfg(unix)]
    #[test]
    fn env_and_cwd_are_applied() {
        let tempdir = tempfile::tempdir().unwrap();
        let runner = ScriptRunner::new("sh", Duration::from_secs(10))
            .unwrap()
            .with_cwd(tempdir.path().to_path_buf())
            .with_env(vec![("FACTORIES_TEST_VAR".to_owned(), "present".to_owned())]);
        let ret = runner.run(&["-c", "pwd; printf %s \"$FACTORIES_TEST_VAR\""]).unwrap();
        assert!(ret.stdout.contains("present"));
    }
}
