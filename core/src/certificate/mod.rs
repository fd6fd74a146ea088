//! Local certificate authority.
//!
//! Owns a self-signed root on disk and issues per-domain leaf certificates
//! signed by it. All material is PEM on disk, named deterministically from
//! the sanitized domain, so repeated issuance requests are cache hits.
//!
//! Cached leaves are returned without an expiry check; regeneration requires
//! deleting the pair on disk. Trust installation is delegated to a
//! [`TrustStore`] adapter so tests run without touching the platform.

mod trust;

pub use trust::{NoopTrustStore, PlatformTrustStore, TrustStore};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, Issuer, KeyPair, KeyUsagePurpose,
};
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::CertificateDer;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::info;

/// Subject common name of the root certificate; also the handle the trust
/// store adapters search for.
pub const CA_COMMON_NAME: &str = "Serv Local Development CA";
const CA_ORGANIZATION: &str = "Serv Local CA";

const CA_VALIDITY_DAYS: i64 = 3650;
const LEAF_VALIDITY_DAYS: i64 = 365;

/// Errors bootstrapping the root.
#[derive(Error, Debug)]
pub enum CaError {
    /// Root key or certificate could not be generated or persisted. Fatal to
    /// any TLS attempt until retried.
    #[error("failed to generate CA certificate: {0}")]
    GenerationFailed(String),

    /// Neither the elevated nor the user-scoped trust installation succeeded.
    #[error("failed to trust CA certificate: {0}")]
    TrustFailed(String),
}

/// Errors issuing a leaf certificate.
#[derive(Error, Debug)]
pub enum IssueError {
    /// Root material is missing or unreadable; run `ensure_ca` first.
    #[error("certificate authority unavailable: {0}")]
    CaUnavailable(String),

    /// Key generation or signing failed for the domain.
    #[error("failed to generate certificate for {domain}: {reason}")]
    Generation { domain: String, reason: String },

    /// Persisting the issued material failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Paths to an issued certificate/key pair, both PEM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Self-signed local root plus a disk cache of per-domain leaves.
pub struct CertificateAuthority<T: TrustStore = PlatformTrustStore> {
    ca_cert_path: PathBuf,
    ca_key_path: PathBuf,
    certs_dir: PathBuf,
    trust: T,
    /// Serializes issuance per domain; the disk cache check is not atomic
    /// against a second issuance of the same domain.
    domain_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CertificateAuthority<PlatformTrustStore> {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self::with_trust(data_dir, PlatformTrustStore::default())
    }
}

impl<T: TrustStore> CertificateAuthority<T> {
    pub fn with_trust(data_dir: impl Into<PathBuf>, trust: T) -> Self {
        let data_dir = data_dir.into();
        Self {
            ca_cert_path: data_dir.join("ca-cert.pem"),
            ca_key_path: data_dir.join("ca-key.pem"),
            certs_dir: data_dir.join("certs"),
            trust,
            domain_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ca_cert_path(&self) -> &Path {
        &self.ca_cert_path
    }

    /// Whether the root is currently present in the platform trust store.
    ///
    /// Queried live, not cached: trust can be revoked externally at any time.
    pub async fn is_trusted(&self) -> bool {
        self.trust.query().await
    }

    /// Idempotently bootstrap the root: generate key + certificate if absent,
    /// then install trust if absent. The two steps are checked independently.
    pub async fn ensure_ca(&self) -> Result<(), CaError> {
        if !(self.ca_cert_path.exists() && self.ca_key_path.exists()) {
            self.generate_root().await?;
        }

        if !self.trust.query().await {
            self.trust.install(&self.ca_cert_path).await?;
        }

        Ok(())
    }

    async fn generate_root(&self) -> Result<(), CaError> {
        let key = KeyPair::generate()
            .map_err(|e| CaError::GenerationFailed(e.to_string()))?;

        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
        ];
        params.not_before = OffsetDateTime::now_utc();
        params.not_after = OffsetDateTime::now_utc() + Duration::days(CA_VALIDITY_DAYS);

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, CA_COMMON_NAME);
        dn.push(DnType::OrganizationName, CA_ORGANIZATION);
        params.distinguished_name = dn;

        let cert = params
            .self_signed(&key)
            .map_err(|e| CaError::GenerationFailed(e.to_string()))?;

        if let Some(parent) = self.ca_cert_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CaError::GenerationFailed(e.to_string()))?;
        }
        fs::write(&self.ca_key_path, key.serialize_pem())
            .await
            .map_err(|e| CaError::GenerationFailed(e.to_string()))?;
        fs::write(&self.ca_cert_path, cert.pem())
            .await
            .map_err(|e| CaError::GenerationFailed(e.to_string()))?;

        info!(path = %self.ca_cert_path.display(), "generated local CA root");
        Ok(())
    }

    /// Issue (or return from cache) a certificate for one domain.
    ///
    /// Leaves carry `DNS:<domain>`, `DNS:localhost`, and `IP:127.0.0.1`
    /// subject alternative names and are valid for one year.
    pub async fn issue(&self, domain: &str) -> Result<TlsMaterial, IssueError> {
        let domain = sanitize_domain(domain);
        let lock = self.domain_lock(&domain).await;
        let _guard = lock.lock().await;

        let cert_path = self.certs_dir.join(format!("{domain}-cert.pem"));
        let key_path = self.certs_dir.join(format!("{domain}-key.pem"));

        if cert_path.exists() && key_path.exists() {
            return Ok(TlsMaterial { cert_path, key_path });
        }

        let (cert_pem, key_pem) = self.sign_leaf(&domain).await?;

        fs::create_dir_all(&self.certs_dir).await?;
        fs::write(&key_path, key_pem).await?;
        if let Err(err) = fs::write(&cert_path, cert_pem).await {
            // Never leave a half-written pair behind
            let _ = fs::remove_file(&key_path).await;
            return Err(err.into());
        }

        info!(%domain, cert = %cert_path.display(), "issued leaf certificate");
        Ok(TlsMaterial { cert_path, key_path })
    }

    async fn sign_leaf(&self, domain: &str) -> Result<(String, String), IssueError> {
        let ca_key_pem = fs::read_to_string(&self.ca_key_path)
            .await
            .map_err(|e| IssueError::CaUnavailable(e.to_string()))?;
        let ca_cert_pem = fs::read_to_string(&self.ca_cert_path)
            .await
            .map_err(|e| IssueError::CaUnavailable(e.to_string()))?;

        let ca_key = KeyPair::from_pem(&ca_key_pem)
            .map_err(|e| IssueError::CaUnavailable(e.to_string()))?;
        let ca_cert_der = CertificateDer::from_pem_slice(ca_cert_pem.as_bytes())
            .map_err(|e| IssueError::CaUnavailable(e.to_string()))?;
        let issuer = Issuer::from_ca_cert_der(&ca_cert_der, ca_key)
            .map_err(|e| IssueError::CaUnavailable(e.to_string()))?;

        let generation = |e: rcgen::Error| IssueError::Generation {
            domain: domain.to_string(),
            reason: e.to_string(),
        };

        let leaf_key = KeyPair::generate().map_err(generation)?;

        let mut params = CertificateParams::new(vec![
            domain.to_string(),
            "localhost".to_string(),
            "127.0.0.1".to_string(),
        ])
        .map_err(generation)?;
        params.is_ca = IsCa::NoCa;
        params.use_authority_key_identifier_extension = true;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.not_before = OffsetDateTime::now_utc();
        params.not_after = OffsetDateTime::now_utc() + Duration::days(LEAF_VALIDITY_DAYS);

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, domain);
        params.distinguished_name = dn;

        let cert = params.signed_by(&leaf_key, &issuer).map_err(generation)?;

        Ok((cert.pem(), leaf_key.serialize_pem()))
    }

    async fn domain_lock(&self, domain: &str) -> Arc<Mutex<()>> {
        let mut locks = self.domain_locks.lock().await;
        locks.entry(domain.to_string()).or_default().clone()
    }
}

/// Restrict a domain to characters safe for both hostnames and file names.
pub fn sanitize_domain(domain: &str) -> String {
    domain
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authority(dir: &Path) -> CertificateAuthority<NoopTrustStore> {
        CertificateAuthority::with_trust(dir, NoopTrustStore)
    }

    #[test]
    fn test_sanitize_domain() {
        assert_eq!(sanitize_domain("My-Site.Local"), "my-site.local");
        assert_eq!(sanitize_domain("a b/c.local"), "abc.local");
    }

    #[tokio::test]
    async fn test_ensure_ca_creates_root_once() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());

        ca.ensure_ca().await.unwrap();
        assert!(dir.path().join("ca-cert.pem").exists());
        assert!(dir.path().join("ca-key.pem").exists());

        let first = std::fs::read(dir.path().join("ca-cert.pem")).unwrap();
        ca.ensure_ca().await.unwrap();
        let second = std::fs::read(dir.path().join("ca-cert.pem")).unwrap();
        assert_eq!(first, second, "root must not be regenerated");
    }

    #[tokio::test]
    async fn test_issue_is_cached_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        ca.ensure_ca().await.unwrap();

        let first = ca.issue("foo.local").await.unwrap();
        let cert_bytes = std::fs::read(&first.cert_path).unwrap();
        let key_bytes = std::fs::read(&first.key_path).unwrap();

        let second = ca.issue("foo.local").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cert_bytes, std::fs::read(&second.cert_path).unwrap());
        assert_eq!(key_bytes, std::fs::read(&second.key_path).unwrap());
    }

    #[tokio::test]
    async fn test_issued_material_is_parseable_pem() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        ca.ensure_ca().await.unwrap();

        let material = ca.issue("bar.local").await.unwrap();
        CertificateDer::from_pem_file(&material.cert_path).unwrap();
        let key_pem = std::fs::read_to_string(&material.key_path).unwrap();
        KeyPair::from_pem(&key_pem).unwrap();
    }

    #[tokio::test]
    async fn test_issue_without_root_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());

        let err = ca.issue("baz.local").await.unwrap_err();
        assert!(matches!(err, IssueError::CaUnavailable(_)));
    }

    #[tokio::test]
    async fn test_distinct_domains_get_distinct_material() {
        let dir = tempfile::tempdir().unwrap();
        let ca = authority(dir.path());
        ca.ensure_ca().await.unwrap();

        let a = ca.issue("a.local").await.unwrap();
        let b = ca.issue("b.local").await.unwrap();
        assert_ne!(a.cert_path, b.cert_path);
        assert_ne!(a.key_path, b.key_path);
    }
}
