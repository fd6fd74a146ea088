//! Static HTTP(S) server for one project folder.
//!
//! Each started server owns exactly one port and serves one directory tree.
//! The caller holds a [`ServerHandle`]; dropping it shuts the server down.

mod files;

pub use files::render_listing_html;

use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};
use std::path::PathBuf;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use thiserror::Error;
use tracing::{debug, warn};

use crate::certificate::TlsMaterial;

#[derive(Error, Debug)]
pub enum ServerError {
    /// The port could not be bound, typically lost in a race after probing.
    #[error("failed to bind port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    /// The bound listener could not be prepared for async use.
    #[error("listener setup failed: {0}")]
    Listener(io::Error),

    /// The project root does not exist or is unreadable.
    #[error("cannot serve {root}: {source}")]
    Root { root: PathBuf, source: io::Error },
}

/// Serves one directory tree on a caller-assigned port.
pub struct StaticServer {
    root: PathBuf,
    index: String,
    listings: bool,
}

impl StaticServer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_options(root, "index.html", true)
    }

    pub fn with_options(root: impl Into<PathBuf>, index: impl Into<String>, listings: bool) -> Self {
        Self {
            root: root.into(),
            index: index.into(),
            listings,
        }
    }

    /// Bind the port and start serving.
    ///
    /// With TLS material the server speaks HTTPS; if the material cannot be
    /// loaded the server downgrades to plain HTTP rather than failing, and
    /// the handle reports which scheme is live.
    pub async fn start(
        &self,
        port: u16,
        tls: Option<&TlsMaterial>,
    ) -> Result<ServerHandle, ServerError> {
        let app = files::router(&self.root, &self.index, self.listings)?;

        let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port))
            .map_err(|source| ServerError::Bind { port, source })?;
        listener.set_nonblocking(true).map_err(ServerError::Listener)?;

        let handle = Handle::new();

        let rustls_config = match tls {
            Some(material) => {
                match RustlsConfig::from_pem_file(&material.cert_path, &material.key_path).await {
                    Ok(config) => Some(config),
                    Err(err) => {
                        warn!(error = %err, "TLS material unusable, serving plain HTTP");
                        None
                    }
                }
            }
            None => None,
        };
        let https = rustls_config.is_some();

        let serve_handle = handle.clone();
        let task = tokio::spawn(async move {
            let result = match rustls_config {
                Some(config) => {
                    axum_server::from_tcp_rustls(listener, config)
                        .handle(serve_handle)
                        .serve(app.into_make_service())
                        .await
                }
                None => {
                    axum_server::from_tcp(listener)
                        .handle(serve_handle)
                        .serve(app.into_make_service())
                        .await
                }
            };
            if let Err(err) = result {
                warn!(port, error = %err, "server terminated unexpectedly");
            }
        });

        debug!(port, https, root = %self.root.display(), "server started");
        Ok(ServerHandle {
            handle,
            task: Some(task),
            port,
            https,
        })
    }
}

/// Control handle for a running server.
pub struct ServerHandle {
    handle: Handle,
    task: Option<tokio::task::JoinHandle<()>>,
    port: u16,
    https: bool,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_https(&self) -> bool {
        self.https
    }

    /// Signal shutdown without waiting. The listener closes asynchronously;
    /// callers that need the port back must use [`ServerHandle::stop`].
    pub fn shutdown(&self) {
        self.handle.shutdown();
    }

    /// Shut down and wait until the serve task has exited and the listener
    /// socket is closed, so the port is immediately bindable again.
    pub async fn stop(mut self) {
        self.handle.shutdown();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
