//! Broker runtime discovery file
//!
//! The broker writes its bind address and auth token here on startup so
//! local tooling can find it without any configuration; the file is
//! removed again on clean shutdown.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{paths, LeashError, Result};

/// Connection details of a running broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Host the broker is bound to
    pub host: String,
    /// Port the broker is listening on
    pub port: u16,
    /// Auth token, if the broker requires one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Broker process id
    pub pid: u32,
    /// Startup time, milliseconds since the Unix epoch
    pub started_at_ms: u64,
}

impl RuntimeConfig {
    /// The broker address in `host:port` form
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Generate a fresh auth token
pub fn generate_auth_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Write the runtime config to the default XDG location
pub fn save_runtime_config(config: &RuntimeConfig) -> Result<PathBuf> {
    let path = paths::runtime_config_file();
    save_runtime_config_at(config, &path)?;
    Ok(path)
}

/// Write the runtime config to an explicit path
pub fn save_runtime_config_at(config: &RuntimeConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LeashError::FileWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let json = serde_json::to_string_pretty(config)
        .map_err(|e| LeashError::internal(format!("Failed to serialize runtime config: {}", e)))?;

    std::fs::write(path, json).map_err(|e| LeashError::FileWrite {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Read the runtime config from the default XDG location
///
/// Returns `None` if no broker has written one.
pub fn load_runtime_config() -> Result<Option<RuntimeConfig>> {
    load_runtime_config_from(&paths::runtime_config_file())
}

/// Read the runtime config from an explicit path
pub fn load_runtime_config_from(path: &Path) -> Result<Option<RuntimeConfig>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(LeashError::FileRead {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    let config = serde_json::from_str(&content)
        .map_err(|e| LeashError::config(format!("Invalid runtime config at {:?}: {}", path, e)))?;
    Ok(Some(config))
}

/// Remove the runtime config file, ignoring a missing file
pub fn remove_runtime_config() -> Result<()> {
    remove_runtime_config_at(&paths::runtime_config_file())
}

/// Remove an explicit runtime config file, ignoring a missing file
pub fn remove_runtime_config_at(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LeashError::Io(e)),
    }
}
