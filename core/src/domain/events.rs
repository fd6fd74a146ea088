//! State-change notifications emitted by the orchestrator.

use uuid::Uuid;

use super::ProjectStatus;

/// Notification sent to presentation layers over the orchestrator's
/// broadcast channel. Consumers subscribe for display only; missing an
/// event is harmless because the project list remains the source of truth.
#[derive(Debug, Clone)]
pub enum ProjectEvent {
    /// A project's lifecycle status changed.
    StatusChanged { id: Uuid, status: ProjectStatus },
    /// The project's hostname was published on the local network.
    HostPublished { id: Uuid, hostname: String },
    /// Hostname publication failed; the project keeps running regardless.
    HostPublishFailed {
        id: Uuid,
        hostname: String,
        reason: String,
    },
}
