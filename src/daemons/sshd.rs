//! SSH daemon factory.
//!
//! Provisions a self-contained sshd instance under the factory root: host
//! and client keys, an `authorized_keys` built from the generated client
//! key, and an `sshd_config` assembled from hardened defaults plus caller
//! overrides. Readiness is the listen port accepting connections.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::daemons::DaemonProcess;
use crate::error::{FactoryError, Result};
use crate::manager::ManagerOptions;
use crate::ports;
use crate::process;

/// Options accepted by
/// [`FactoriesManager::get_sshd_daemon`](crate::manager::FactoriesManager::get_sshd_daemon).
#[derive(Debug, Clone, Default)]
pub struct SshdConfig {
    /// Defaults to `127.0.0.1`.
    pub listen_address: Option<String>,
    /// Defaults to a freshly allocated unused port.
    pub listen_port: Option<u16>,
    /// Extra `sshd_config` directives; these win over the generated
    /// defaults. Listen address and port always come from the fields
    /// above.
    pub sshd_options: BTreeMap<String, String>,
}

/// A provisioned sshd instance.
pub struct SshdDaemon {
    config_dir: PathBuf,
    listen_address: String,
    listen_port: u16,
    client_key: PathBuf,
    sshd_config_file: PathBuf,
    process: DaemonProcess,
}

impl SshdDaemon {
    /// Generate keys and configuration under `config_dir` and prepare the
    /// supervisor. Nothing is spawned until `start`.
    pub(crate) fn provision(
        daemon_id: &str,
        config_dir: PathBuf,
        config: SshdConfig,
        options: &ManagerOptions,
    ) -> Result<Self> {
        let sshd = which::which("sshd")
            .map_err(|_| FactoryError::BinaryNotFound("sshd".to_owned()))?;
        let ssh_keygen = which::which("ssh-keygen")
            .map_err(|_| FactoryError::BinaryNotFound("ssh-keygen".to_owned()))?;

        fs::create_dir_all(&config_dir)?;
        restrict_permissions(&config_dir, 0o700)?;

        let listen_address = config
            .listen_address
            .unwrap_or_else(|| "127.0.0.1".to_owned());
        let listen_port = match config.listen_port {
            Some(port) => port,
            None => ports::get_unused_localhost_port()?,
        };

        let host_key = config_dir.join("ssh_host_ed25519_key");
        generate_key(&ssh_keygen, &host_key)?;
        let client_key = config_dir.join("client_key");
        generate_key(&ssh_keygen, &client_key)?;

        let authorized_keys = config_dir.join("authorized_keys");
        let client_pub = fs::read_to_string(client_key.with_extension("pub"))?;
        fs::write(&authorized_keys, client_pub)?;
        restrict_permissions(&authorized_keys, 0o600)?;

        let mut directives: BTreeMap<String, String> = BTreeMap::from([
            ("HostKey".to_owned(), host_key.display().to_string()),
            (
                "AuthorizedKeysFile".to_owned(),
                authorized_keys.display().to_string(),
            ),
            (
                "PidFile".to_owned(),
                config_dir.join("sshd.pid").display().to_string(),
            ),
            ("PasswordAuthentication".to_owned(), "no".to_owned()),
            ("ChallengeResponseAuthentication".to_owned(), "no".to_owned()),
            ("PermitEmptyPasswords".to_owned(), "no".to_owned()),
            ("PermitRootLogin".to_owned(), "prohibit-password".to_owned()),
            ("UsePAM".to_owned(), "no".to_owned()),
            ("Subsystem".to_owned(), "sftp internal-sftp".to_owned()),
        ]);
        for (key, value) in config.sshd_options {
            directives.insert(key, value);
        }
        directives.insert("ListenAddress".to_owned(), listen_address.clone());
        directives.insert("Port".to_owned(), listen_port.to_string());

        let sshd_config_file = config_dir.join("sshd_config");
        let mut rendered = String::new();
        for (key, value) in &directives {
            rendered.push_str(key);
            rendered.push(' ');
            rendered.push_str(value);
            rendered.push('\n');
        }
        fs::write(&sshd_config_file, rendered)?;
        restrict_permissions(&sshd_config_file, 0o600)?;
        debug!(
            "Wrote sshd config for {daemon_id} to {}",
            sshd_config_file.display()
        );

        let cmdline = vec![
            sshd.display().to_string(),
            "-D".to_owned(),
            "-e".to_owned(),
            "-f".to_owned(),
            sshd_config_file.display().to_string(),
        ];
        let mut process = DaemonProcess::new(
            format!("sshd-{daemon_id}"),
            cmdline,
            config_dir.join("sshd.log"),
        )
        .with_check_ports(vec![listen_port])
        .with_start_timeout(options.start_timeout)
        .with_max_start_attempts(options.max_start_attempts)
        .with_slow_stop(options.slow_stop)
        .with_env(options.env.clone());
        if let Some(cwd) = &options.cwd {
            process = process.with_cwd(cwd.clone());
        }

        Ok(Self {
            config_dir,
            listen_address,
            listen_port,
            client_key,
            sshd_config_file,
            process,
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn listen_address(&self) -> &str {
        &self.listen_address
    }

    pub fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Private key the ssh client authenticates with.
    pub fn client_key(&self) -> &Path {
        &self.client_key
    }

    pub fn sshd_config_file(&self) -> &Path {
        &self.sshd_config_file
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

fn generate_key(ssh_keygen: &Path, path: &Path) -> Result<()> {
    process::run_command(
        &[
            ssh_keygen.display().to_string(),
            "-t".to_owned(),
            "ed25519".to_owned(),
            "-N".to_owned(),
            String::new(),
            "-f".to_owned(),
            path.display().to_string(),
            "-q".to_owned(),
        ],
        None,
    )?;
    restrict_permissions(path, 0o600)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use salt_markers::skip_if_binaries_missing;

    #[test]
    fn provisioning_writes_keys_and_config() {
        if let Some(reason) = skip_if_binaries_missing(&["sshd", "ssh-keygen"], false, None) {
            eprintln!("skipped: {reason}");
            return;
        }
        let tempdir = tempfile::tempdir().unwrap();
        let config = SshdConfig {
            sshd_options: BTreeMap::from([("StrictModes".to_owned(), "no".to_owned())]),
            ..Default::default()
        };
        let daemon = SshdDaemon::provision(
            "unit",
            tempdir.path().join("sshd"),
            config,
            &ManagerOptions::default(),
        )
        .unwrap();

        assert!(daemon.client_key().is_file());
        assert!(daemon.client_key().with_extension("pub").is_file());
        assert!(daemon.config_dir().join("authorized_keys").is_file());

        let rendered = fs::read_to_string(daemon.sshd_config_file()).unwrap();
        assert!(rendered.contains(&format!("Port {}", daemon.listen_port())));
        assert!(rendered.contains("ListenAddress 127.0.0.1"));
        assert!(rendered.contains("StrictModes no"));
        assert!(rendered.contains("PasswordAuthentication no"));
    }

    #[test]
    fn listen_settings_cannot_be_overridden_by_directives() {
        if let Some(reason) = skip_if_binaries_missing(&["sshd", "ssh-keygen"], false, None) {
            eprintln!("skipped: {reason}");
            return;
        }
        let tempdir = tempfile::tempdir().unwrap();
        let config = SshdConfig {
            listen_port: Some(2222),
            sshd_options: BTreeMap::from([("Port".to_owned(), "9".to_owned())]),
            ..Default::default()
        };
        let daemon = SshdDaemon::provision(
            "unit",
            tempdir.path().join("sshd"),
            config,
            &ManagerOptions::default(),
        )
        .unwrap();
        let rendered = fs::read_to_string(daemon.sshd_config_file()).unwrap();
        assert!(rendered.contains("Port 2222"));
        assert!(!rendered.contains("Port 9\n"));
    }
}
