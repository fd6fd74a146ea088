//! Project model and lifecycle status.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// ProjectStatus
// ============================================================================

/// Lifecycle state of a project's server.
///
/// `Starting` is transient and always resolves to `Running` or `Error`.
/// Stop is synchronous from the orchestrator's point of view, so there is no
/// `Stopping` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum ProjectStatus {
    Stopped,
    Starting,
    Running { port: u16 },
    Error { message: String },
}

impl ProjectStatus {
    /// Whether a server is live (or about to be) for this project.
    pub fn is_active(&self) -> bool {
        matches!(self, ProjectStatus::Starting | ProjectStatus::Running { .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ProjectStatus::Running { .. })
    }

    /// The assigned port, if running.
    pub fn port(&self) -> Option<u16> {
        match self {
            ProjectStatus::Running { port } => Some(*port),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectStatus::Stopped => write!(f, "Stopped"),
            ProjectStatus::Starting => write!(f, "Starting..."),
            ProjectStatus::Running { port } => write!(f, "Running on port {port}"),
            ProjectStatus::Error { message } => write!(f, "Error: {message}"),
        }
    }
}

// ============================================================================
// Project
// ============================================================================

/// A user-designated folder exposed as one HTTP(S) endpoint.
///
/// At most one live server and one hostname publication exist per project id
/// at any time; the orchestrator enforces this.
#[derive(Debug, Clone)]
pub struct Project {
    /// Stable unique id.
    pub id: Uuid,
    /// Folder served as the site root.
    pub root: PathBuf,
    /// Display name, derived from the folder name.
    pub name: String,
    /// Host-safe name used as the published hostname label.
    pub sanitized_name: String,
    /// Whether the project should be served over HTTPS.
    pub use_tls: bool,
    /// Last assigned (or user-requested) port, preferred on the next start.
    pub preferred_port: Option<u16>,
    /// Current lifecycle status.
    pub status: ProjectStatus,
}

impl Project {
    /// Create a new stopped project for the given folder.
    pub fn new(root: PathBuf) -> Self {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string());
        let sanitized_name = sanitize_name(&name);

        Self {
            id: Uuid::new_v4(),
            root,
            name,
            sanitized_name,
            use_tls: false,
            preferred_port: None,
            status: ProjectStatus::Stopped,
        }
    }

    /// Rename the project, re-deriving the host-safe label.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.sanitized_name = sanitize_name(&self.name);
    }

    /// The hostname published for this project, e.g. `my-site.local`.
    pub fn hostname(&self, suffix: &str) -> String {
        format!("{}.{}", self.sanitized_name, suffix)
    }

    /// The browsable URL while running, if any.
    pub fn url(&self, suffix: &str) -> Option<String> {
        let port = self.status.port()?;
        let scheme = if self.use_tls { "https" } else { "http" };
        Some(format!("{scheme}://{}:{port}", self.hostname(suffix)))
    }
}

/// Transform a display name into a valid hostname label.
///
/// Lowercases, maps spaces and underscores to hyphens, and strips everything
/// that is not alphanumeric or a hyphen. An empty result falls back to
/// `"project"` so the label is always publishable.
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '_' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();

    if sanitized.is_empty() {
        "project".to_string()
    } else {
        sanitized
    }
}
