//! Runtime configuration and project-list persistence.
//!
//! Persisted project records live in JSON at `<data_dir>/projects.json`,
//! ordered the way the user arranged them.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Error, Result};

/// Ports below this are never auto-allocated or accepted from users.
pub const MIN_USER_PORT: u16 = 1024;

/// Default pool the allocator draws from.
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 8000..=9999;

/// Settings shared by every service the orchestrator composes.
#[derive(Debug, Clone)]
pub struct ServConfig {
    /// Inclusive pool of auto-allocatable ports.
    pub port_range: RangeInclusive<u16>,
    /// Directory holding CA material, leaf certificates, and project records.
    pub data_dir: PathBuf,
    /// Hostname suffix projects are published under (`<name>.<suffix>`).
    pub local_suffix: String,
    /// Document served when a directory contains one.
    pub index_file: String,
    /// Whether directories without an index render a generated listing.
    pub directory_listings: bool,
}

impl ServConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            port_range: DEFAULT_PORT_RANGE,
            data_dir: data_dir.into(),
            local_suffix: "local".to_string(),
            index_file: "index.html".to_string(),
            directory_listings: true,
        }
    }

    /// Resolve configuration rooted at the per-user `~/.serv` directory.
    pub fn resolve() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("Could not find home directory".to_string()))?;
        Ok(Self::new(home.join(".serv")))
    }

    /// Validate a user-supplied port before it is accepted as a preference.
    pub fn validate_user_port(port: u16) -> Result<()> {
        if port < MIN_USER_PORT {
            return Err(Error::PortOutOfRange(port));
        }
        Ok(())
    }
}

/// One persisted project entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    /// Folder served as the site root.
    pub path: PathBuf,

    /// Whether the project is served over HTTPS.
    #[serde(default, rename = "useTLS")]
    pub use_tls: bool,

    /// Port preferred on the next start, if one was ever assigned.
    #[serde(default, rename = "preferredPort")]
    pub preferred_port: Option<u16>,
}

/// Loads and saves the ordered project list.
pub struct ProjectStore {
    path: PathBuf,
}

impl ProjectStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join("projects.json"),
        }
    }

    /// Load all records; a missing file yields an empty list.
    pub async fn load(&self) -> Result<Vec<ProjectRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Persist the full ordered list, creating the data directory if needed.
    pub async fn save(&self, records: &[ProjectRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(records)?;
        fs::write(&self.path, json).await?;
        Ok(())
    }
}
