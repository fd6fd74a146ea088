//! Domain layer - Pure data models.
//!
//! This module contains the entities the orchestrator manages. These types
//! have no I/O dependencies and can be tested in isolation.

mod events;
mod project;

pub use events::ProjectEvent;
pub use project::{sanitize_name, Project, ProjectStatus};
