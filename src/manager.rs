//! Factories manager.
//!
//! The manager holds the merged factories configuration, the daemon
//! runtime options and the root directory every provisioned daemon lives
//! under. Each `get_*` call provisions a fresh, isolated instance; the
//! returned value owns its process and cleans up when dropped.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;
use tracing::debug;

use crate::cli::{SaltKeyCli, SaltSshCli, SaltSshConfig};
use crate::config::FactoriesConfig;
use crate::daemons::{SaltApiDaemon, SaltMasterDaemon, SshdConfig, SshdDaemon};
use crate::error::Result;

/// Runtime options applied to every daemon the manager provisions.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// How long each start attempt may take to confirm running status.
    pub start_timeout: Duration,
    /// Ask nicely with SIGTERM before killing the process tree.
    pub slow_stop: bool,
    pub max_start_attempts: usize,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            start_timeout: default_start_timeout(),
            slow_stop: true,
            max_start_attempts: 3,
            cwd: None,
            env: Vec::new(),
        }
    }
}

impl ManagerOptions {
    pub fn with_start_timeout(mut self, start_timeout: Duration) -> Self {
        self.start_timeout = start_timeout;
        self
    }

    pub fn with_slow_stop(mut self, slow_stop: bool) -> Self {
        self.slow_stop = slow_stop;
        self
    }

    pub fn with_max_start_attempts(mut self, max_start_attempts: usize) -> Self {
        self.max_start_attempts = max_start_attempts;
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
}

/// Daemons need noticeably longer to confirm startup on Windows and macOS.
fn default_start_timeout() -> Duration {
    if cfg!(any(windows, target_os = "macos")) {
        Duration::from_secs(120)
    } else {
        Duration::from_secs(30)
    }
}

enum RootDir {
    Provided(PathBuf),
    Temp(TempDir),
}

impl RootDir {
    fn path(&self) -> &Path {
        match self {
            RootDir::Provided(path) => path,
            RootDir::Temp(tempdir) => tempdir.path(),
        }
    }
}

/// Provisions salt daemons and CLI tools under a single root directory.
///
/// Dropping the manager removes the root directory when it was created by
/// the manager itself; a caller-provided root is left in place.
pub struct FactoriesManager {
    config: FactoriesConfig,
    options: ManagerOptions,
    root: RootDir,
}

impl FactoriesManager {
    /// A manager rooted at a fresh temporary directory.
    pub fn new(config: FactoriesConfig, options: ManagerOptions) -> Result<Self> {
        let tempdir = tempfile::Builder::new()
            .prefix("salt-factories-")
            .tempdir()?;
        debug!("Factories root directory: {}", tempdir.path().display());
        Ok(Self {
            config,
            options,
            root: RootDir::Temp(tempdir),
        })
    }

    /// A manager rooted at `root_dir`, created if missing and kept on drop.
    pub fn with_root_dir(
        root_dir: PathBuf,
        config: FactoriesConfig,
        options: ManagerOptions,
    ) -> Result<Self> {
        fs::create_dir_all(&root_dir)?;
        Ok(Self {
            config,
            options,
            root: RootDir::Provided(root_dir),
        })
    }

    pub fn root_dir(&self) -> &Path {
        self.root.path()
    }

    pub fn config(&self) -> &FactoriesConfig {
        &self.config
    }

    pub fn options(&self) -> &ManagerOptions {
        &self.options
    }

    /// A directory under the root reserved for `daemon_id`.
    ///
    /// The plain id is used when free, otherwise `{id}_1`, `{id}_2` and so
    /// on, so repeated instances of the same daemon never share state.
    pub fn daemon_root_dir(&self, daemon_id: &str) -> Result<PathBuf> {
        let mut candidate = self.root.path().join(daemon_id);
        let mut counter = 1;
        while candidate.is_dir() {
            candidate = self.root.path().join(format!("{daemon_id}_{counter}"));
            counter += 1;
        }
        fs::create_dir_all(&candidate)?;
        Ok(candidate)
    }

    /// Provision an sshd daemon. Call `start` (or `started`) on the
    /// returned value to spawn it.
    pub fn get_sshd_daemon(&self, daemon_id: &str, config: SshdConfig) -> Result<SshdDaemon> {
        let config_dir = self.daemon_root_dir(daemon_id)?;
        SshdDaemon::provision(daemon_id, config_dir, config, &self.options)
    }

    /// Provision a salt-master daemon with `overrides` merged over the
    /// generated configuration. Pass `Value::Null` for no overrides.
    pub fn get_salt_master_daemon(
        &self,
        master_id: &str,
        overrides: &Value,
    ) -> Result<SaltMasterDaemon> {
        let root_dir = self.daemon_root_dir(master_id)?;
        SaltMasterDaemon::provision(master_id, root_dir, overrides, &self.config, &self.options)
    }

    /// Provision a salt-api daemon attached to `master`.
    pub fn get_salt_api_daemon(&self, master: &SaltMasterDaemon) -> Result<SaltApiDaemon> {
        SaltApiDaemon::provision(master, &self.options)
    }

    /// A salt-ssh CLI bound to `master` and the given connection settings.
    pub fn get_salt_ssh_cli(
        &self,
        master: &SaltMasterDaemon,
        config: SaltSshConfig,
    ) -> Result<SaltSshCli> {
        SaltSshCli::provision(master, config, &self.options)
    }

    /// A salt-key CLI bound to `master`.
    pub fn get_salt_key_cli(&self, master: &SaltMasterDaemon) -> Result<SaltKeyCli> {
        SaltKeyCli::provision(master, &self.options)
    }
}
