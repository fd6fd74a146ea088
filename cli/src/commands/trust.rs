//! Trust command - bootstrap the local certificate authority.

use anyhow::Result;
use serv_core::{CertificateAuthority, ServConfig};

pub async fn run(config: ServConfig) -> Result<()> {
    let ca = CertificateAuthority::new(&config.data_dir);

    if ca.is_trusted().await {
        println!("Local CA is already trusted.");
        println!("Certificate: {}", ca.ca_cert_path().display());
        return Ok(());
    }

    println!("Generating local CA and requesting trust (you may be prompted)...");
    ca.ensure_ca().await?;

    if ca.is_trusted().await {
        println!("Local CA is now trusted.");
    } else {
        println!("Local CA installed, but the trust store does not report it yet.");
    }
    println!("Certificate: {}", ca.ca_cert_path().display());
    Ok(())
}
