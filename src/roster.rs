//! Roster generation for `salt-ssh`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// One roster target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mine_functions: Option<BTreeMap<String, serde_yaml::Value>>,
}

impl RosterEntry {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            user: None,
            mine_functions: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Declare a mine function for this target, e.g. `test.arg` with
    /// `["itworked"]`.
    pub fn with_mine_function(
        mut self,
        name: impl Into<String>,
        args: Vec<serde_yaml::Value>,
    ) -> Self {
        self.mine_functions
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), serde_yaml::Value::Sequence(args));
        self
    }
}

/// A roster document: entries keyed by target name, rendered to YAML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    pub entries: BTreeMap<String, RosterEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, entry: RosterEntry) -> &mut Self {
        self.entries.insert(name.into(), entry);
        self
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Write the roster to `path` and return an RAII handle that deletes
    /// the file again when dropped.
    pub fn write_to(&self, path: impl Into<PathBuf>) -> Result<RosterFile> {
        let path = path.into();
        fs::write(&path, self.to_yaml()?)?;
        Ok(RosterFile { path })
    }
}

/// Deletes the underlying roster file on drop, regardless of test outcome.
#[derive(Debug)]
pub struct RosterFile {
    path: PathBuf,
}

impl RosterFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RosterFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != std::io::ErrorKind::NotFound
        {
            warn!("Failed to remove roster file {}: {err}", self.path.display());
        }
    }
}
