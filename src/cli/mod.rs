//! Salt CLI factories.
//!
//! Each factory binds a salt script to a provisioned master's config
//! directory and returns [`ShellResult`](crate::process::ShellResult)
//! values carrying the exit code and the parsed JSON output.

pub mod key;
pub mod ssh;

pub use key::SaltKeyCli;
pub use ssh::{SaltSshCli, SaltSshConfig};
