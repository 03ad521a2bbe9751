//! Salt master daemon factory.
//!
//! Builds the master configuration mapping (scaffolding the conf, state
//! tree and pillar tree directories, allocating the listen ports), merges
//! caller overrides, writes the result as YAML to `conf/master` and
//! supervises `salt-master` on top of it. Readiness is the publish and ret
//! ports accepting connections.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::FactoriesConfig;
use crate::daemons::DaemonProcess;
use crate::error::{FactoryError, Result};
use crate::manager::ManagerOptions;
use crate::ports;

/// The master configuration mapping written to `conf/master`.
///
/// The typed fields carry the defaults every test master gets; anything
/// else a caller overrides (for example a `rest_cherrypy` section) is kept
/// in `extra` and written out alongside them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterConfig {
    pub id: String,
    pub conf_file: PathBuf,
    pub root_dir: PathBuf,
    pub interface: String,
    pub publish_port: u16,
    pub ret_port: u16,
    pub tcp_master_pub_port: u16,
    pub tcp_master_pull_port: u16,
    pub tcp_master_publish_pull: u16,
    pub tcp_master_workers: u16,
    pub worker_threads: u32,
    pub pidfile: PathBuf,
    pub api_pidfile: PathBuf,
    pub pki_dir: PathBuf,
    pub cachedir: PathBuf,
    pub timeout: u32,
    pub sock_dir: PathBuf,
    pub fileserver_list_cache_time: u32,
    pub fileserver_backend: Vec<String>,
    pub pillar_opts: bool,
    pub log_file: PathBuf,
    pub log_level_logfile: String,
    pub api_logfile: PathBuf,
    pub key_logfile: PathBuf,
    pub file_roots: BTreeMap<String, PathBuf>,
    pub pillar_roots: BTreeMap<String, PathBuf>,
    pub hash_type: String,
    pub transport: String,
    pub order_masters: bool,
    pub max_open_files: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl MasterConfig {
    /// The default configuration for `master_id` rooted at `root_dir`.
    ///
    /// Creates the conf, state-tree and pillar-tree scaffolding and
    /// allocates the six listen ports. Log forwarding points at the
    /// factories log server.
    pub fn generate(
        master_id: &str,
        root_dir: &Path,
        factories_config: &FactoriesConfig,
    ) -> Result<Self> {
        let conf_dir = root_dir.join("conf");
        fs::create_dir_all(&conf_dir)?;
        let state_tree_base = root_dir.join("state-tree").join("base");
        let state_tree_prod = root_dir.join("state-tree").join("prod");
        let pillar_tree_base = root_dir.join("pillar-tree").join("base");
        let pillar_tree_prod = root_dir.join("pillar-tree").join("prod");
        for dir in [
            &state_tree_base,
            &state_tree_prod,
            &pillar_tree_base,
            &pillar_tree_prod,
        ] {
            fs::create_dir_all(dir)?;
        }

        let log_forwarding = serde_yaml::to_value(BTreeMap::from([(
            "log".to_owned(),
            BTreeMap::from([
                (
                    "host".to_owned(),
                    serde_yaml::Value::String(factories_config.log_server_host.clone()),
                ),
                (
                    "port".to_owned(),
                    serde_yaml::Value::Number(factories_config.log_server_port.into()),
                ),
                (
                    "level".to_owned(),
                    serde_yaml::Value::String(factories_config.log_server_level.clone()),
                ),
                (
                    "prefix".to_owned(),
                    serde_yaml::Value::String(format!("salt-master({master_id})")),
                ),
            ]),
        )]))?;

        Ok(Self {
            id: master_id.to_owned(),
            conf_file: conf_dir.join("master"),
            root_dir: root_dir.to_path_buf(),
            interface: "127.0.0.1".to_owned(),
            publish_port: ports::get_unused_localhost_port()?,
            ret_port: ports::get_unused_localhost_port()?,
            tcp_master_pub_port: ports::get_unused_localhost_port()?,
            tcp_master_pull_port: ports::get_unused_localhost_port()?,
            tcp_master_publish_pull: ports::get_unused_localhost_port()?,
            tcp_master_workers: ports::get_unused_localhost_port()?,
            worker_threads: 3,
            pidfile: PathBuf::from("run/master.pid"),
            api_pidfile: PathBuf::from("run/api.pid"),
            pki_dir: PathBuf::from("pki"),
            cachedir: PathBuf::from("cache"),
            timeout: 3,
            sock_dir: PathBuf::from("run/master"),
            fileserver_list_cache_time: 0,
            fileserver_backend: vec!["roots".to_owned()],
            pillar_opts: false,
            log_file: PathBuf::from("logs/master.log"),
            log_level_logfile: "debug".to_owned(),
            api_logfile: PathBuf::from("logs/api.log"),
            key_logfile: PathBuf::from("logs/key.log"),
            file_roots: BTreeMap::from([
                ("base".to_owned(), state_tree_base),
                ("prod".to_owned(), state_tree_prod),
            ]),
            pillar_roots: BTreeMap::from([
                ("base".to_owned(), pillar_tree_base),
                ("prod".to_owned(), pillar_tree_prod),
            ]),
            hash_type: "sha256".to_owned(),
            transport: "zeromq".to_owned(),
            order_masters: false,
            max_open_files: 10240,
            extra: BTreeMap::from([("salt-factories".to_owned(), log_forwarding)]),
        })
    }

    /// Merge `overrides` over this configuration, key by key, override
    /// values winning. Keys without a typed field land in `extra`.
    ///
    /// # Errors
    ///
    /// [`FactoryError::InvalidConfiguration`] when `overrides` is neither a
    /// mapping nor null, or a typed field receives a wrongly-typed value.
    pub fn apply_overrides(self, overrides: &Value) -> Result<MasterConfig> {
        let override_map = match overrides {
            Value::Null => return Ok(self),
            Value::Object(map) if map.is_empty() => return Ok(self),
            Value::Object(map) => map,
            other => {
                return Err(FactoryError::InvalidConfiguration(format!(
                    "The master configuration overrides must be a mapping, got: {other}"
                )));
            }
        };

        let mut merged = match serde_json::to_value(&self)? {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        for (key, value) in override_map {
            merged.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(merged)).map_err(|err| {
            FactoryError::InvalidConfiguration(format!(
                "The merged master configuration is invalid: {err}"
            ))
        })
    }

    /// Directory holding the `master` config file.
    pub fn conf_dir(&self) -> &Path {
        self.conf_file.parent().unwrap_or(&self.root_dir)
    }
}

/// A provisioned salt-master instance.
pub struct SaltMasterDaemon {
    config: MasterConfig,
    process: DaemonProcess,
}

impl SaltMasterDaemon {
    /// Build the configuration, write it to disk and prepare the
    /// supervisor. Nothing is spawned until `start`.
    pub(crate) fn provision(
        master_id: &str,
        root_dir: PathBuf,
        overrides: &Value,
        factories_config: &FactoriesConfig,
        options: &ManagerOptions,
    ) -> Result<Self> {
        let salt_master = which::which("salt-master")
            .map_err(|_| FactoryError::BinaryNotFound("salt-master".to_owned()))?;

        let config = MasterConfig::generate(master_id, &root_dir, factories_config)?
            .apply_overrides(overrides)?;
        fs::write(&config.conf_file, serde_yaml::to_string(&config)?)?;
        debug!(
            "Wrote master config for {master_id} to {}",
            config.conf_file.display()
        );

        let cmdline = vec![
            salt_master.display().to_string(),
            "--config-dir".to_owned(),
            config.conf_dir().display().to_string(),
            "--log-level=quiet".to_owned(),
        ];
        let mut process = DaemonProcess::new(
            format!("salt-master-{master_id}"),
            cmdline,
            root_dir.join("logs").join("master-console.log"),
        )
        .with_check_ports(vec![config.publish_port, config.ret_port])
        .with_start_timeout(options.start_timeout)
        .with_max_start_attempts(options.max_start_attempts)
        .with_slow_stop(options.slow_stop)
        .with_env(options.env.clone());
        if let Some(cwd) = &options.cwd {
            process = process.with_cwd(cwd.clone());
        }

        Ok(Self { config, process })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn conf_dir(&self) -> &Path {
        self.config.conf_dir()
    }

    pub fn root_dir(&self) -> &Path {
        &self.config.root_dir
    }

    pub fn publish_port(&self) -> u16 {
        self.config.publish_port
    }

    pub fn ret_port(&self) -> u16 {
        self.config.ret_port
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.pid()
    }

    pub fn start(&mut self) -> Result<()> {
        self.process.start()
    }

    /// Consume, start, and hand back the running daemon. Dropping the
    /// returned value stops the process.
    pub fn started(mut self) -> Result<Self> {
        self.start()?;
        Ok(self)
    }

    pub fn is_running(&mut self) -> bool {
        self.process.is_running()
    }

    pub fn terminate(&mut self) -> Option<crate::process::ProcessResult> {
        self.process.terminate()
    }
}
