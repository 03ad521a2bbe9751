//! Daemon supervision: spawn, readiness checks, guaranteed teardown.
//!
//! [`DaemonProcess`] is the generic supervisor the concrete factories build
//! on. It spawns the daemon in its own process group with output redirected
//! to a log file, polls readiness (process alive plus all check ports
//! accepting TCP connections) until the start timeout, retries a bounded
//! number of times, and terminates the whole process tree on drop so every
//! factory behaves as an RAII scoped resource.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{FactoryError, Result};
use crate::ports;
use crate::process::{self, ProcessResult};

pub mod api;
pub mod master;
pub mod sshd;

pub use api::SaltApiDaemon;
pub use master::{MasterConfig, SaltMasterDaemon};
pub use sshd::{SshdConfig, SshdDaemon};

/// How often the readiness loop re-checks the process and its ports.
const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Grace period between SIGTERM and SIGKILL when stopping slowly.
const SLOW_STOP_GRACE: Duration = Duration::from_secs(10);

/// Generic supervisor for one daemon process.
pub struct DaemonProcess {
    display_name: String,
    cmdline: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, String)>,
    check_ports: Vec<u16>,
    start_timeout: Duration,
    max_start_attempts: usize,
    slow_stop: bool,
    log_path: PathBuf,
    child: Option<Child>,
}

impl DaemonProcess {
    /// A supervisor for `cmdline` whose console output goes to `log_path`.
    ///
    /// Timeouts and attempts start from the stock defaults; the `with_*`
    /// methods adjust them before the first `start`.
    pub fn new(display_name: impl Into<String>, cmdline: Vec<String>, log_path: PathBuf) -> Self {
        Self {
            display_name: display_name.into(),
            cmdline,
            cwd: None,
            env: Vec::new(),
            check_ports: Vec::new(),
            start_timeout: Duration::from_secs(30),
            max_start_attempts: 3,
            slow_stop: true,
            log_path,
            child: None,
        }
    }

    /// Ports that must accept a TCP connection before the daemon counts as
    /// started.
    pub fn with_check_ports(mut self, check_ports: Vec<u16>) -> Self {
        self.check_ports = check_ports;
        self
    }

    pub fn with_start_timeout(mut self, start_timeout: Duration) -> Self {
        self.start_timeout = start_timeout;
        self
    }

    pub fn with_max_start_attempts(mut self, max_start_attempts: usize) -> Self {
        self.max_start_attempts = max_start_attempts;
        self
    }

    pub fn with_slow_stop(mut self, slow_stop: bool) -> Self {
        self.slow_stop = slow_stop;
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

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn cmdline(&self) -> &[String] {
        &self.cmdline
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn check_ports(&self) -> &[u16] {
        &self.check_ports
    }

    /// Pid of the supervised process while it is alive.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// True while the spawned process is alive.
    pub fn is_running(&mut self) -> bool {
        match &mut self.child {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Start the daemon and wait until it is ready.
    ///
    /// Each attempt spawns the process and polls readiness until the start
    /// timeout; a failed attempt tears the process down before the next
    /// one. After `max_start_attempts` failed attempts the daemon is
    /// reported as not started with the captured output attached.
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            warn!("{} is already running", self.display_name);
            return Ok(());
        }
        let mut last_output = None;
        for attempt in 1..=self.max_start_attempts {
            info!(
                "Starting {}, attempt {attempt} of {}",
                self.display_name, self.max_start_attempts
            );
            let started = Instant::now();
            let child = process::spawn_to_log_file(
                &self.cmdline,
                self.cwd.as_deref(),
                &self.env,
                &self.log_path,
            )?;
            debug!("{} spawned with pid {}", self.display_name, child.id());
            self.child = Some(child);

            if self.wait_until_ready() {
                info!(
                    "{} is running after {:.2?}",
                    self.display_name,
                    started.elapsed()
                );
                return Ok(());
            }
            warn!(
                "{} failed to confirm running status on attempt {attempt}",
                self.display_name
            );
            last_output = self.terminate();
        }
        Err(FactoryError::DaemonNotStarted {
            name: self.display_name.clone(),
            attempts: self.max_start_attempts,
            output: last_output,
        })
    }

    fn wait_until_ready(&mut self) -> bool {
        let deadline = Instant::now() + self.start_timeout;
        let mut remaining: HashSet<u16> = self.check_ports.iter().copied().collect();
        loop {
            if !self.is_running() {
                warn!("{} exited before confirming readiness", self.display_name);
                return false;
            }
            if !remaining.is_empty() {
                for port in ports::connectable_ports(remaining.iter().copied()) {
                    debug!("{}: port {port} is now connectable", self.display_name);
                    remaining.remove(&port);
                }
            }
            if remaining.is_empty() {
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    "{} did not become ready within {:?}; ports still not connectable: {:?}",
                    self.display_name, self.start_timeout, remaining
                );
                return false;
            }
            thread::sleep(READINESS_POLL_INTERVAL);
        }
    }

    /// Stop the daemon and collect its output. Safe to call repeatedly;
    /// only the call that actually stops the process returns output.
    ///
    /// With `slow_stop` the process group first gets a SIGTERM and a grace
    /// period; the whole tree is killed afterwards either way.
    pub fn terminate(&mut self) -> Option<ProcessResult> {
        let mut child = self.child.take()?;
        info!("Stopping {}", self.display_name);
        if self.slow_stop && matches!(child.try_wait(), Ok(None)) {
            process::terminate_process_group(child.id());
            let deadline = Instant::now() + SLOW_STOP_GRACE;
            while matches!(child.try_wait(), Ok(None)) {
                if Instant::now() >= deadline {
                    warn!(
                        "{} did not stop within {SLOW_STOP_GRACE:?} of SIGTERM, killing it",
                        self.display_name
                    );
                    break;
                }
                thread::sleep(Duration::from_millis(100));
            }
        }
        process::kill_process_tree(&mut child);
        let exitcode = child.wait().ok().and_then(|status| status.code()).unwrap_or(-1);
        let output = std::fs::read_to_string(&self.log_path).unwrap_or_default();
        let result = ProcessResult {
            exitcode,
            stdout: output,
            stderr: String::new(),
            cmdline: self.cmdline.clone(),
        };
        debug!("{} was terminated:\n{result}", self.display_name);
        Some(result)
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if self.child.is_some() {
            let _ = self.terminate();
        }
    }
}

impl std::fmt::Debug for DaemonProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonProcess")
            .field("display_name", &self.display_name)
            .field("cmdline", &self.cmdline)
            .field("check_ports", &self.check_ports)
            .field("running", &self.child.is_some())
            .finish_non_exhaustive()
    }
}
