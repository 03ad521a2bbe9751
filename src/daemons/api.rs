//! Salt API daemon factory.
//!
//! salt-api has no configuration of its own. It runs against the config
//! directory of the master it is attached to, so the master override
//! mapping must already carry a `rest_cherrypy` or `rest_tornado` section
//! naming the port to listen on.

use serde_yaml::Value;

use crate::daemons::master::{MasterConfig, SaltMasterDaemon};
use crate::daemons::DaemonProcess;
use crate::error::{FactoryError, Result};
use crate::manager::ManagerOptions;

/// A salt-api instance attached to a provisioned master.
pub struct SaltApiDaemon {
    master_id: String,
    port: u16,
    process: DaemonProcess,
}

impl SaltApiDaemon {
    pub(crate) fn provision(master: &SaltMasterDaemon, options: &ManagerOptions) -> Result<Self> {
        let salt_api = which::which("salt-api")
            .map_err(|_| FactoryError::BinaryNotFound("salt-api".to_owned()))?;
        let port = api_port(master.config())?;

        let cmdline = vec![
            salt_api.display().to_string(),
            "--config-dir".to_owned(),
            master.conf_dir().display().to_string(),
            "--log-level=quiet".to_owned(),
        ];
        let mut process = DaemonProcess::new(
            format!("salt-api-{}", master.id()),
            cmdline,
            master.root_dir().join("logs").join("api-console.log"),
        )
        .with_check_ports(vec![port])
        .with_start_timeout(options.start_timeout)
        .with_max_start_attempts(options.max_start_attempts)
        .with_slow_stop(options.slow_stop)
        .with_env(options.env.clone());
        if let Some(cwd) = &options.cwd {
            process = process.with_cwd(cwd.clone());
        }

        Ok(Self {
            master_id: master.id().to_owned(),
            port,
            process,
        })
    }

    /// The id of the master this instance is attached to.
    pub fn master_id(&self) -> &str {
        &self.master_id
    }

    /// The port the API listens on.
    pub fn port(&self) -> u16 {
        self.port
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

/// The listen port configured for salt-api in the master configuration.
fn api_port(config: &MasterConfig) -> Result<u16> {
    for section in ["rest_cherrypy", "rest_tornado"] {
        if let Some(settings) = config.extra.get(section) {
            let port = settings
                .get("port")
                .and_then(Value::as_u64)
                .and_then(|port| u16::try_from(port).ok())
                .ok_or_else(|| {
                    FactoryError::InvalidConfiguration(format!(
                        "The '{section}' section of the master configuration does not define a \
                         valid port"
                    ))
                })?;
            return Ok(port);
        }
    }
    Err(FactoryError::InvalidConfiguration(
        "The master configuration for this salt-api instance does not have any api configured, \
         add a 'rest_cherrypy' or 'rest_tornado' section"
            .to_owned(),
    ))
}
