//! salt-factories - Salt daemon factories for integration test suites
//!
//! The crate provisions throwaway salt daemons (and the sshd they talk
//! over) from Rust test code: each factory writes its configuration under
//! an isolated root directory, supervises the spawned process, and tears
//! everything down when the handle is dropped.

pub mod cli;
pub mod config;
pub mod daemons;
pub mod error;
pub mod manager;
pub mod ports;
pub mod process;
pub mod roster;
pub mod utils;

pub use cli::{SaltKeyCli, SaltSshCli, SaltSshConfig};
pub use config::{FactoriesConfig, LogServer};
pub use daemons::{MasterConfig, SaltApiDaemon, SaltMasterDaemon, SshdConfig, SshdDaemon};
pub use error::{FactoryError, Result};
pub use manager::{FactoriesManager, ManagerOptions};
pub use process::{ProcessResult, ScriptRunner, ShellResult};
pub use roster::{Roster, RosterEntry, RosterFile};

pub use salt_markers as markers;
pub use salt_markers::{
    skip_if_binaries_missing, skip_on_darwin, skip_on_linux, skip_on_windows,
    skip_unless_on_darwin, skip_unless_on_linux, skip_unless_on_windows,
};
