//! Loopback hostname publication over mDNS.
//!
//! Each running project is announced as `<name>.<suffix>` resolving to
//! 127.0.0.1, so browsers on the same machine can use stable names instead
//! of ports. Publication is cosmetic: failures are reported but never stop
//! a server.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

const SERVICE_TYPE: &str = "_http._tcp.local.";

#[derive(Error, Debug)]
pub enum PublishError {
    /// The mDNS daemon could not be started.
    #[error("mDNS daemon unavailable: {0}")]
    Daemon(String),

    /// Registration of one hostname failed.
    #[error("failed to publish {hostname}: {reason}")]
    Register { hostname: String, reason: String },
}

/// Publishes and withdraws loopback hostnames.
///
/// `unpublish` is infallible; withdrawing a name that was never published
/// (or whose registration failed) is a no-op.
pub trait HostPublisher: Send + Sync {
    fn publish(
        &self,
        name: &str,
        port: u16,
    ) -> impl std::future::Future<Output = Result<(), PublishError>> + Send;

    fn unpublish(&self, name: &str) -> impl std::future::Future<Output = ()> + Send;
}

/// mDNS-backed publisher.
///
/// The daemon is started lazily on the first publication so that processes
/// which never publish (tests, plain-HTTP one-offs on localhost) never open
/// multicast sockets.
pub struct MdnsPublisher {
    suffix: String,
    daemon: Mutex<Option<ServiceDaemon>>,
    /// Sanitized name -> registered service fullname.
    registered: Mutex<HashMap<String, String>>,
}

impl MdnsPublisher {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            daemon: Mutex::new(None),
            registered: Mutex::new(HashMap::new()),
        }
    }

    fn daemon(&self) -> Result<ServiceDaemon, PublishError> {
        let mut slot = self.daemon.lock();
        if let Some(daemon) = slot.as_ref() {
            return Ok(daemon.clone());
        }
        let daemon = ServiceDaemon::new().map_err(|e| PublishError::Daemon(e.to_string()))?;
        *slot = Some(daemon.clone());
        Ok(daemon)
    }
}

impl HostPublisher for MdnsPublisher {
    async fn publish(&self, name: &str, port: u16) -> Result<(), PublishError> {
        let daemon = self.daemon()?;
        let hostname = format!("{name}.{}", self.suffix);
        let host_fqdn = format!("{hostname}.");

        let info = ServiceInfo::new(
            SERVICE_TYPE,
            name,
            &host_fqdn,
            Ipv4Addr::LOCALHOST.to_string(),
            port,
            HashMap::<String, String>::new(),
        )
        .map_err(|e| PublishError::Register {
            hostname: hostname.clone(),
            reason: e.to_string(),
        })?;

        let fullname = info.get_fullname().to_string();
        daemon.register(info).map_err(|e| PublishError::Register {
            hostname: hostname.clone(),
            reason: e.to_string(),
        })?;

        self.registered.lock().insert(name.to_string(), fullname);
        debug!(%hostname, port, "published loopback hostname");
        Ok(())
    }

    async fn unpublish(&self, name: &str) {
        let fullname = self.registered.lock().remove(name);
        let Some(fullname) = fullname else { return };

        let daemon = self.daemon.lock().clone();
        if let Some(daemon) = daemon {
            if let Err(err) = daemon.unregister(&fullname) {
                warn!(%name, error = %err, "failed to withdraw hostname");
            }
        }
    }
}

impl Drop for MdnsPublisher {
    fn drop(&mut self) {
        if let Some(daemon) = self.daemon.lock().take() {
            let _ = daemon.shutdown();
        }
    }
}

/// Publisher that records names without touching the network. For tests.
#[derive(Debug, Default)]
pub struct NullPublisher {
    published: Mutex<HashSet<String>>,
}

impl NullPublisher {
    pub fn is_published(&self, name: &str) -> bool {
        self.published.lock().contains(name)
    }
}

impl HostPublisher for NullPublisher {
    async fn publish(&self, name: &str, _port: u16) -> Result<(), PublishError> {
        self.published.lock().insert(name.to_string());
        Ok(())
    }

    async fn unpublish(&self, name: &str) {
        self.published.lock().remove(name);
    }
}
