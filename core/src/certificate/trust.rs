//! Platform trust store adapters.
//!
//! Installing a root certificate requires talking to whatever trust database
//! the platform uses, usually with elevation. The [`TrustStore`] trait keeps
//! that narrow: one query, one install. The certificate authority itself
//! never shells out.

use std::path::Path;
use std::time::Duration;

use super::{CaError, CA_COMMON_NAME};

/// Upper bound on how long an interactive elevation prompt may stay open
/// before installation falls back to the user-scoped store.
const ELEVATED_PROMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// Access to the platform trust database.
pub trait TrustStore: Send + Sync {
    /// Whether the local root is currently trusted.
    fn query(&self) -> impl std::future::Future<Output = bool> + Send;

    /// Install the certificate at `cert_path` as a trusted root.
    fn install(
        &self,
        cert_path: &Path,
    ) -> impl std::future::Future<Output = Result<(), CaError>> + Send;
}

/// Trust store backed by the operating system.
///
/// Installation first attempts the system-wide store behind an elevation
/// prompt, bounded by [`ELEVATED_PROMPT_TIMEOUT`], then falls back to the
/// current user's store. Either succeeding counts as installed.
#[derive(Debug, Default)]
pub struct PlatformTrustStore;

impl TrustStore for PlatformTrustStore {
    async fn query(&self) -> bool {
        platform::query().await
    }

    async fn install(&self, cert_path: &Path) -> Result<(), CaError> {
        let elevated = tokio::time::timeout(
            ELEVATED_PROMPT_TIMEOUT,
            platform::install_elevated(cert_path),
        )
        .await;

        match elevated {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(reason)) => {
                tracing::warn!(%reason, "elevated trust installation failed, trying user store")
            }
            Err(_) => tracing::warn!("elevated trust prompt timed out, trying user store"),
        }

        platform::install_user(cert_path)
            .await
            .map_err(CaError::TrustFailed)
    }
}

/// Trust store that reports trusted and installs nothing. For tests and for
/// callers that manage trust out of band.
#[derive(Debug, Default)]
pub struct NoopTrustStore;

impl TrustStore for NoopTrustStore {
    async fn query(&self) -> bool {
        true
    }

    async fn install(&self, _cert_path: &Path) -> Result<(), CaError> {
        Ok(())
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use std::path::Path;
    use std::process::Stdio;

    use tokio::process::Command;

    use super::CA_COMMON_NAME;

    const SYSTEM_KEYCHAIN: &str = "/Library/Keychains/System.keychain";

    pub async fn query() -> bool {
        // Check the system keychain explicitly, then the default search list
        // which covers the login keychain fallback.
        found(&["find-certificate", "-c", CA_COMMON_NAME, SYSTEM_KEYCHAIN]).await
            || found(&["find-certificate", "-c", CA_COMMON_NAME]).await
    }

    async fn found(args: &[&str]) -> bool {
        Command::new("security")
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    pub async fn install_elevated(cert_path: &Path) -> Result<(), String> {
        // Single-quoted path inside the shell script; quotes the path cannot
        // contain because it lives under the data directory we created.
        let script = format!(
            "do shell script \"security add-trusted-cert -d -r trustRoot -k {} '{}'\" \
             with administrator privileges",
            SYSTEM_KEYCHAIN,
            cert_path.display()
        );

        let output = Command::new("osascript")
            .args(["-e", &script])
            .stdout(Stdio::null())
            .output()
            .await
            .map_err(|e| e.to_string())?;

        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }

    pub async fn install_user(cert_path: &Path) -> Result<(), String> {
        let home = dirs::home_dir().ok_or_else(|| "no home directory".to_string())?;
        let login_keychain = home.join("Library/Keychains/login.keychain-db");

        let output = Command::new("security")
            .arg("add-trusted-cert")
            .args(["-r", "trustRoot", "-k"])
            .arg(&login_keychain)
            .arg(cert_path)
            .stdout(Stdio::null())
            .output()
            .await
            .map_err(|e| e.to_string())?;

        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::path::Path;
    use std::process::Stdio;

    use tokio::process::Command;

    use super::CA_COMMON_NAME;

    const SYSTEM_ANCHOR: &str = "/usr/local/share/ca-certificates/serv-local-ca.crt";

    pub async fn query() -> bool {
        if Path::new(SYSTEM_ANCHOR).exists() {
            return true;
        }
        nss_query().await
    }

    async fn nss_query() -> bool {
        let Some(db) = nss_db() else { return false };
        Command::new("certutil")
            .args(["-L", "-d", &db, "-n", CA_COMMON_NAME])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    pub async fn install_elevated(cert_path: &Path) -> Result<(), String> {
        let cp = Command::new("pkexec")
            .arg("cp")
            .arg(cert_path)
            .arg(SYSTEM_ANCHOR)
            .stdout(Stdio::null())
            .output()
            .await
            .map_err(|e| e.to_string())?;
        if !cp.status.success() {
            return Err(String::from_utf8_lossy(&cp.stderr).trim().to_string());
        }

        let update = Command::new("pkexec")
            .arg("update-ca-certificates")
            .stdout(Stdio::null())
            .output()
            .await
            .map_err(|e| e.to_string())?;
        if update.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&update.stderr).trim().to_string())
        }
    }

    pub async fn install_user(cert_path: &Path) -> Result<(), String> {
        // NSS user database, honored by Firefox and Chromium.
        let db = nss_db().ok_or_else(|| "no home directory".to_string())?;

        let output = Command::new("certutil")
            .args(["-A", "-d", &db, "-n", CA_COMMON_NAME, "-t", "C,,", "-i"])
            .arg(cert_path)
            .stdout(Stdio::null())
            .output()
            .await
            .map_err(|e| e.to_string())?;

        if output.status.success() {
            Ok(())
        } else {
            Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
        }
    }

    fn nss_db() -> Option<String> {
        let home = dirs::home_dir()?;
        Some(format!("sql:{}", home.join(".pki/nssdb").display()))
    }
}

#[cfg(not(any(target_os = "macos", target_os = "linux")))]
mod platform {
    use std::path::Path;

    pub async fn query() -> bool {
        false
    }

    pub async fn install_elevated(_cert_path: &Path) -> Result<(), String> {
        Err("trust installation is not supported on this platform".to_string())
    }

    pub async fn install_user(_cert_path: &Path) -> Result<(), String> {
        Err("trust installation is not supported on this platform".to_string())
    }
}
