//! Project lifecycle orchestration.
//!
//! Composes the port allocator, certificate authority, host publisher, and
//! static server into per-project start/stop operations. All services are
//! injected, so every collaborator can be swapped in tests.
//!
//! Concurrency model: one async mutex per project id serializes that
//! project's operations (a stop issued while a start is in flight queues
//! behind it), while operations on different projects proceed in parallel.
//! Synchronous locks are never held across an await point.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::allocator::{PortAllocator, PortProber, TcpProber};
use crate::certificate::{CertificateAuthority, PlatformTrustStore, TlsMaterial, TrustStore};
use crate::config::{ProjectRecord, ServConfig};
use crate::domain::{Project, ProjectEvent, ProjectStatus};
use crate::error::{Error, Result};
use crate::publisher::HostPublisher;
use crate::server::{ServerHandle, StaticServer};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Live resources owned by one running project.
struct RunningProject {
    handle: ServerHandle,
    port: u16,
    /// Sanitized label the hostname was published under.
    name: String,
    /// In-flight (or finished) publication task; awaited on stop so a fast
    /// stop cannot leave a registration behind.
    publish_task: tokio::task::JoinHandle<()>,
}

/// Drives projects between stopped and running.
pub struct ProjectOrchestrator<P, T = PlatformTrustStore, B = TcpProber>
where
    P: HostPublisher + 'static,
    T: TrustStore,
    B: PortProber,
{
    config: ServConfig,
    allocator: Arc<PortAllocator<B>>,
    ca: Arc<CertificateAuthority<T>>,
    publisher: Arc<P>,
    /// Ordered project list, the user-visible source of truth.
    projects: RwLock<Vec<Project>>,
    running: Mutex<HashMap<Uuid, RunningProject>>,
    op_locks: Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
    events: broadcast::Sender<ProjectEvent>,
}

impl<P, T, B> ProjectOrchestrator<P, T, B>
where
    P: HostPublisher + 'static,
    T: TrustStore,
    B: PortProber,
{
    pub fn new(
        config: ServConfig,
        allocator: Arc<PortAllocator<B>>,
        ca: Arc<CertificateAuthority<T>>,
        publisher: Arc<P>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            allocator,
            ca,
            publisher,
            projects: RwLock::new(Vec::new()),
            running: Mutex::new(HashMap::new()),
            op_locks: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to status and publication events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProjectEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &ServConfig {
        &self.config
    }

    pub fn certificate_authority(&self) -> &CertificateAuthority<T> {
        &self.ca
    }

    // ========================================================================
    // Project list
    // ========================================================================

    /// Register a folder as a project. Adding the same folder twice returns
    /// the existing project's id.
    pub fn add_project(&self, root: PathBuf) -> Uuid {
        let mut projects = self.projects.write();
        if let Some(existing) = projects.iter().find(|p| p.root == root) {
            return existing.id;
        }
        let project = Project::new(root);
        let id = project.id;
        info!(name = %project.name, "added project");
        projects.push(project);
        id
    }

    /// Remove a project, stopping it first if it is running.
    pub async fn remove_project(&self, id: Uuid) -> Result<()> {
        self.stop(id).await?;
        self.projects.write().retain(|p| p.id != id);
        self.op_locks.lock().remove(&id);
        Ok(())
    }

    pub fn project(&self, id: Uuid) -> Option<Project> {
        self.projects.read().iter().find(|p| p.id == id).cloned()
    }

    pub fn projects(&self) -> Vec<Project> {
        self.projects.read().clone()
    }

    /// Whether the project's live server is actually speaking HTTPS, which
    /// can differ from `use_tls` when material failed to load.
    pub fn is_https(&self, id: Uuid) -> bool {
        self.running
            .lock()
            .get(&id)
            .map(|r| r.handle.is_https())
            .unwrap_or(false)
    }

    /// Snapshot the project list for persistence, in display order.
    pub fn records(&self) -> Vec<ProjectRecord> {
        self.projects
            .read()
            .iter()
            .map(|p| ProjectRecord {
                path: p.root.clone(),
                use_tls: p.use_tls,
                preferred_port: p.preferred_port,
            })
            .collect()
    }

    /// Recreate stopped projects from persisted records, preserving order.
    pub fn restore(&self, records: Vec<ProjectRecord>) {
        for record in records {
            let id = self.add_project(record.path);
            let mut projects = self.projects.write();
            if let Some(project) = projects.iter_mut().find(|p| p.id == id) {
                project.use_tls = record.use_tls;
                project.preferred_port = record.preferred_port;
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the project's server. A no-op when it is already starting or
    /// running.
    pub async fn start(&self, id: Uuid) -> Result<()> {
        let lock = self.op_lock(id);
        let _guard = lock.lock().await;
        self.start_locked(id).await
    }

    /// Stop the project's server. Idempotent; queues behind an in-flight
    /// start and then tears down what that start brought up.
    pub async fn stop(&self, id: Uuid) -> Result<()> {
        let lock = self.op_lock(id);
        let _guard = lock.lock().await;
        self.stop_locked(id).await
    }

    pub async fn restart(&self, id: Uuid) -> Result<()> {
        let lock = self.op_lock(id);
        let _guard = lock.lock().await;
        self.stop_locked(id).await?;
        self.start_locked(id).await
    }

    /// Stop every running project, continuing past individual failures.
    pub async fn stop_all(&self) {
        let ids: Vec<Uuid> = self.projects.read().iter().map(|p| p.id).collect();
        for id in ids {
            if let Err(err) = self.stop(id).await {
                warn!(%id, error = %err, "failed to stop project");
            }
        }
    }

    /// Toggle HTTPS for a project, restarting it if it was running.
    pub async fn toggle_tls(&self, id: Uuid) -> Result<()> {
        let lock = self.op_lock(id);
        let _guard = lock.lock().await;

        let project = self.project(id).ok_or(Error::ProjectNotFound(id))?;
        let was_active = project.status.is_active();
        if was_active {
            self.stop_locked(id).await?;
        }

        let enabling = !project.use_tls;
        {
            let mut projects = self.projects.write();
            if let Some(p) = projects.iter_mut().find(|p| p.id == id) {
                p.use_tls = enabling;
            }
        }

        // Surface CA bootstrap problems at toggle time instead of burying
        // them in the next start attempt.
        if enabling {
            if let Err(err) = self.ca.ensure_ca().await {
                self.set_status(id, ProjectStatus::Error { message: err.to_string() });
                return Ok(());
            }
        }

        if was_active {
            self.start_locked(id).await?;
        }
        Ok(())
    }

    /// Apply a rename and/or preferred-port change, restarting the project
    /// if it was running. An out-of-range port is rejected before anything
    /// is touched.
    pub async fn update_config(
        &self,
        id: Uuid,
        name: Option<String>,
        port: Option<u16>,
    ) -> Result<()> {
        if let Some(port) = port {
            ServConfig::validate_user_port(port)?;
        }

        let lock = self.op_lock(id);
        let _guard = lock.lock().await;

        let project = self.project(id).ok_or(Error::ProjectNotFound(id))?;
        let was_active = project.status.is_active();
        if was_active {
            self.stop_locked(id).await?;
        }

        {
            let mut projects = self.projects.write();
            if let Some(p) = projects.iter_mut().find(|p| p.id == id) {
                if let Some(name) = name {
                    p.rename(name);
                }
                if let Some(port) = port {
                    p.preferred_port = Some(port);
                }
            }
        }

        if was_active {
            self.start_locked(id).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn start_locked(&self, id: Uuid) -> Result<()> {
        let project = self.project(id).ok_or(Error::ProjectNotFound(id))?;
        if project.status.is_active() {
            return Ok(());
        }

        self.set_status(id, ProjectStatus::Starting);

        match self.spin_up(&project).await {
            Ok((handle, port, name)) => {
                let publish_task = self.spawn_publish(id, name.clone(), port);
                self.running.lock().insert(
                    id,
                    RunningProject {
                        handle,
                        port,
                        name,
                        publish_task,
                    },
                );

                {
                    let mut projects = self.projects.write();
                    if let Some(p) = projects.iter_mut().find(|p| p.id == id) {
                        p.preferred_port = Some(port);
                    }
                }
                self.set_status(id, ProjectStatus::Running { port });
                info!(name = %project.name, port, "project started");
                Ok(())
            }
            Err(err) => {
                // Start failures become project state, not caller errors.
                warn!(name = %project.name, error = %err, "project failed to start");
                self.set_status(
                    id,
                    ProjectStatus::Error {
                        message: err.to_string(),
                    },
                );
                Ok(())
            }
        }
    }

    /// Bring up port, TLS material, and server. Unwinds the port lease on
    /// any failure so nothing leaks.
    async fn spin_up(&self, project: &Project) -> Result<(ServerHandle, u16, String)> {
        let port = self.allocator.acquire(project.preferred_port)?;

        let tls = if project.use_tls {
            match self.issue_tls(project).await {
                Ok(material) => Some(material),
                Err(err) => {
                    self.allocator.release(port);
                    return Err(err);
                }
            }
        } else {
            None
        };

        let server = StaticServer::with_options(
            &project.root,
            &self.config.index_file,
            self.config.directory_listings,
        );
        let handle = match server.start(port, tls.as_ref()).await {
            Ok(handle) => handle,
            Err(err) => {
                self.allocator.release(port);
                return Err(err.into());
            }
        };

        Ok((handle, port, project.sanitized_name.clone()))
    }

    async fn issue_tls(&self, project: &Project) -> Result<TlsMaterial> {
        self.ca.ensure_ca().await?;
        let hostname = project.hostname(&self.config.local_suffix);
        Ok(self.ca.issue(&hostname).await?)
    }

    async fn stop_locked(&self, id: Uuid) -> Result<()> {
        if self.project(id).is_none() {
            return Err(Error::ProjectNotFound(id));
        }

        let Some(running) = self.running.lock().remove(&id) else {
            // Already stopped; clear any lingering error state.
            if !matches!(
                self.project(id).map(|p| p.status),
                Some(ProjectStatus::Stopped)
            ) {
                self.set_status(id, ProjectStatus::Stopped);
            }
            return Ok(());
        };

        // Wait for the listener to actually close so the released port is
        // bindable by the next start, and for any in-flight publication to
        // settle so the unpublish below withdraws it.
        running.handle.stop().await;
        let _ = running.publish_task.await;
        self.publisher.unpublish(&running.name).await;
        self.allocator.release(running.port);
        self.set_status(id, ProjectStatus::Stopped);
        info!(port = running.port, "project stopped");
        Ok(())
    }

    /// Publication happens off the start path: a slow or absent mDNS daemon
    /// must not delay the server becoming reachable.
    fn spawn_publish(&self, id: Uuid, name: String, port: u16) -> tokio::task::JoinHandle<()> {
        let publisher = self.publisher.clone();
        let events = self.events.clone();
        let hostname = format!("{name}.{}", self.config.local_suffix);

        tokio::spawn(async move {
            match publisher.publish(&name, port).await {
                Ok(()) => {
                    let _ = events.send(ProjectEvent::HostPublished { id, hostname });
                }
                Err(err) => {
                    warn!(%hostname, error = %err, "hostname publication failed");
                    let _ = events.send(ProjectEvent::HostPublishFailed {
                        id,
                        hostname,
                        reason: err.to_string(),
                    });
                }
            }
        })
    }

    fn set_status(&self, id: Uuid, status: ProjectStatus) {
        {
            let mut projects = self.projects.write();
            if let Some(project) = projects.iter_mut().find(|p| p.id == id) {
                project.status = status.clone();
            }
        }
        let _ = self.events.send(ProjectEvent::StatusChanged { id, status });
    }

    fn op_lock(&self, id: Uuid) -> Arc<AsyncMutex<()>> {
        self.op_locks.lock().entry(id).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::certificate::NoopTrustStore;
    use crate::publisher::{NullPublisher, PublishError};
    use std::path::Path;
    use std::time::Duration;

    /// Publisher whose registration takes a while to land.
    #[derive(Default)]
    struct SlowPublisher {
        inner: NullPublisher,
    }

    impl HostPublisher for SlowPublisher {
        async fn publish(&self, name: &str, port: u16) -> std::result::Result<(), PublishError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.inner.publish(name, port).await
        }

        async fn unpublish(&self, name: &str) {
            self.inner.unpublish(name).await;
        }
    }

    fn orchestrator(data_dir: &Path) -> ProjectOrchestrator<NullPublisher, NoopTrustStore> {
        let config = ServConfig::new(data_dir);
        let allocator = Arc::new(PortAllocator::new(config.port_range.clone()));
        let ca = Arc::new(CertificateAuthority::with_trust(data_dir, NoopTrustStore));
        ProjectOrchestrator::new(config, allocator, ca, Arc::new(NullPublisher::default()))
    }

    fn site_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hi</h1>").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let data = tempfile::tempdir().unwrap();
        let site = site_dir();
        let orch = orchestrator(data.path());

        let id = orch.add_project(site.path().to_path_buf());
        assert_eq!(orch.project(id).unwrap().status, ProjectStatus::Stopped);

        orch.start(id).await.unwrap();
        let project = orch.project(id).unwrap();
        let port = project.status.port().expect("should be running");
        assert!(orch.config().port_range.contains(&port));

        let body = reqwest::get(format!("http://127.0.0.1:{port}/"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "<h1>hi</h1>");

        orch.stop(id).await.unwrap();
        assert_eq!(orch.project(id).unwrap().status, ProjectStatus::Stopped);
        assert_eq!(orch.allocator.leased_count(), 0);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_running() {
        let data = tempfile::tempdir().unwrap();
        let site = site_dir();
        let orch = orchestrator(data.path());
        let id = orch.add_project(site.path().to_path_buf());

        orch.start(id).await.unwrap();
        let port = orch.project(id).unwrap().status.port().unwrap();

        orch.start(id).await.unwrap();
        assert_eq!(orch.project(id).unwrap().status.port(), Some(port));
        assert_eq!(orch.allocator.leased_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let data = tempfile::tempdir().unwrap();
        let site = site_dir();
        let orch = orchestrator(data.path());
        let id = orch.add_project(site.path().to_path_buf());

        orch.stop(id).await.unwrap();
        orch.start(id).await.unwrap();
        orch.stop(id).await.unwrap();
        orch.stop(id).await.unwrap();
        assert_eq!(orch.project(id).unwrap().status, ProjectStatus::Stopped);
    }

    #[tokio::test]
    async fn test_restart_prefers_previous_port() {
        let data = tempfile::tempdir().unwrap();
        let site = site_dir();
        let orch = orchestrator(data.path());
        let id = orch.add_project(site.path().to_path_buf());

        orch.start(id).await.unwrap();
        let first = orch.project(id).unwrap().status.port().unwrap();
        orch.stop(id).await.unwrap();

        orch.start(id).await.unwrap();
        assert_eq!(orch.project(id).unwrap().status.port(), Some(first));
    }

    #[tokio::test]
    async fn test_failed_start_releases_port_and_sets_error() {
        let data = tempfile::tempdir().unwrap();
        let orch = orchestrator(data.path());

        // Root that does not exist makes the server refuse to start.
        let id = orch.add_project(PathBuf::from("/nonexistent/serv-test-root"));
        orch.start(id).await.unwrap();

        assert!(matches!(
            orch.project(id).unwrap().status,
            ProjectStatus::Error { .. }
        ));
        assert_eq!(orch.allocator.leased_count(), 0);
    }

    #[tokio::test]
    async fn test_two_projects_get_distinct_ports() {
        let data = tempfile::tempdir().unwrap();
        let site_a = site_dir();
        let site_b = site_dir();
        let orch = orchestrator(data.path());

        let a = orch.add_project(site_a.path().to_path_buf());
        let b = orch.add_project(site_b.path().to_path_buf());
        orch.start(a).await.unwrap();
        orch.start(b).await.unwrap();

        let port_a = orch.project(a).unwrap().status.port().unwrap();
        let port_b = orch.project(b).unwrap().status.port().unwrap();
        assert_ne!(port_a, port_b);

        orch.stop_all().await;
        assert_eq!(orch.allocator.leased_count(), 0);
    }

    #[tokio::test]
    async fn test_hostname_published_after_start() {
        let data = tempfile::tempdir().unwrap();
        let site = site_dir();
        let orch = orchestrator(data.path());
        let id = orch.add_project(site.path().to_path_buf());

        orch.start(id).await.unwrap();
        let name = orch.project(id).unwrap().sanitized_name;

        // Publication runs off the start path
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(orch.publisher.is_published(&name));

        orch.stop(id).await.unwrap();
        assert!(!orch.publisher.is_published(&name));
    }

    #[tokio::test]
    async fn test_fast_stop_withdraws_in_flight_publication() {
        let data = tempfile::tempdir().unwrap();
        let site = site_dir();
        let config = ServConfig::new(data.path());
        let allocator = Arc::new(PortAllocator::new(config.port_range.clone()));
        let ca = Arc::new(CertificateAuthority::with_trust(data.path(), NoopTrustStore));
        let orch =
            ProjectOrchestrator::new(config, allocator, ca, Arc::new(SlowPublisher::default()));

        let id = orch.add_project(site.path().to_path_buf());
        orch.start(id).await.unwrap();
        // Stop lands while the publication is still registering
        orch.stop(id).await.unwrap();
        assert_eq!(orch.project(id).unwrap().status, ProjectStatus::Stopped);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let name = orch.project(id).unwrap().sanitized_name;
        assert!(
            !orch.publisher.inner.is_published(&name),
            "publication survived the stop"
        );
    }

    #[tokio::test]
    async fn test_unknown_project_is_an_error() {
        let data = tempfile::tempdir().unwrap();
        let orch = orchestrator(data.path());

        let err = orch.start(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, Error::ProjectNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_config_rejects_privileged_ports() {
        let data = tempfile::tempdir().unwrap();
        let site = site_dir();
        let orch = orchestrator(data.path());
        let id = orch.add_project(site.path().to_path_buf());

        let err = orch.update_config(id, None, Some(80)).await.unwrap_err();
        assert!(matches!(err, Error::PortOutOfRange(80)));
        // Nothing was applied
        assert_eq!(orch.project(id).unwrap().preferred_port, None);
    }

    #[tokio::test]
    async fn test_update_config_renames_and_repins_port() {
        let data = tempfile::tempdir().unwrap();
        let site = site_dir();
        let orch = orchestrator(data.path());
        let id = orch.add_project(site.path().to_path_buf());

        orch.update_config(id, Some("My Docs".to_string()), Some(9400))
            .await
            .unwrap();

        let project = orch.project(id).unwrap();
        assert_eq!(project.name, "My Docs");
        assert_eq!(project.sanitized_name, "my-docs");
        assert_eq!(project.preferred_port, Some(9400));
    }

    #[tokio::test]
    async fn test_add_project_dedupes_by_path() {
        let data = tempfile::tempdir().unwrap();
        let site = site_dir();
        let orch = orchestrator(data.path());

        let first = orch.add_project(site.path().to_path_buf());
        let second = orch.add_project(site.path().to_path_buf());
        assert_eq!(first, second);
        assert_eq!(orch.projects().len(), 1);
    }

    #[tokio::test]
    async fn test_records_roundtrip_through_restore() {
        let data = tempfile::tempdir().unwrap();
        let site = site_dir();
        let orch = orchestrator(data.path());
        let id = orch.add_project(site.path().to_path_buf());
        orch.update_config(id, None, Some(9100)).await.unwrap();
        orch.toggle_tls(id).await.unwrap();

        let records = orch.records();

        let data2 = tempfile::tempdir().unwrap();
        let orch2 = orchestrator(data2.path());
        orch2.restore(records);

        let projects = orch2.projects();
        let restored = &projects[0];
        assert_eq!(restored.root, site.path().to_path_buf());
        assert!(restored.use_tls);
        assert_eq!(restored.preferred_port, Some(9100));
        assert_eq!(restored.status, ProjectStatus::Stopped);
    }

    #[tokio::test]
    async fn test_remove_project_stops_it_first() {
        let data = tempfile::tempdir().unwrap();
        let site = site_dir();
        let orch = orchestrator(data.path());
        let id = orch.add_project(site.path().to_path_buf());

        orch.start(id).await.unwrap();
        orch.remove_project(id).await.unwrap();

        assert!(orch.project(id).is_none());
        assert_eq!(orch.allocator.leased_count(), 0);
    }
}
