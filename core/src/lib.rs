//! Serv core library.
//!
//! Turns local folders into independently served HTTP(S) endpoints:
//!
//! - Port allocation from a managed pool, with bind probing
//! - A local certificate authority issuing per-domain TLS material
//! - Loopback hostname publication over mDNS (`<name>.local`)
//! - Static file serving with index resolution and directory listings
//! - A project orchestrator tying the lifecycle together
//!
//! Every service sits behind a trait or injected handle so frontends and
//! tests compose exactly the pieces they need.

pub mod allocator;
pub mod certificate;
pub mod config;
pub mod domain;
pub mod error;
pub mod orchestrator;
pub mod publisher;
pub mod server;

pub use allocator::{PortAllocator, PortProber, TcpProber};
pub use certificate::{
    CaError, CertificateAuthority, IssueError, NoopTrustStore, PlatformTrustStore, TlsMaterial,
    TrustStore,
};
pub use config::{ProjectRecord, ProjectStore, ServConfig, DEFAULT_PORT_RANGE, MIN_USER_PORT};
pub use domain::{sanitize_name, Project, ProjectEvent, ProjectStatus};
pub use error::{Error, Result};
pub use orchestrator::ProjectOrchestrator;
pub use publisher::{HostPublisher, MdnsPublisher, NullPublisher, PublishError};
pub use server::{ServerError, ServerHandle, StaticServer};
