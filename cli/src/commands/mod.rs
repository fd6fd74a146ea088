pub mod projects;
pub mod serve;
pub mod trust;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serv_core::{
    CertificateAuthority, MdnsPublisher, PlatformTrustStore, PortAllocator, ProjectOrchestrator,
    ServConfig,
};

pub type Orchestrator = ProjectOrchestrator<MdnsPublisher, PlatformTrustStore>;

pub fn config(data_dir: Option<PathBuf>) -> Result<ServConfig> {
    Ok(match data_dir {
        Some(dir) => ServConfig::new(dir),
        None => ServConfig::resolve()?,
    })
}

/// Wire the production services together.
pub fn orchestrator(config: ServConfig) -> Orchestrator {
    let allocator = Arc::new(PortAllocator::new(config.port_range.clone()));
    let ca = Arc::new(CertificateAuthority::new(&config.data_dir));
    let publisher = Arc::new(MdnsPublisher::new(&config.local_suffix));
    ProjectOrchestrator::new(config, allocator, ca, publisher)
}
