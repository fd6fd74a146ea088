//! Project list commands - add, remove, and list saved projects.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serv_core::{sanitize_name, ProjectRecord, ProjectStore, ServConfig};

pub async fn add(
    config: ServConfig,
    folder: PathBuf,
    tls: bool,
    port: Option<u16>,
) -> Result<()> {
    if let Some(port) = port {
        ServConfig::validate_user_port(port)?;
    }
    let root = folder
        .canonicalize()
        .with_context(|| format!("cannot add {}", folder.display()))?;

    let store = ProjectStore::new(&config.data_dir);
    let mut records = store.load().await?;

    match records.iter_mut().find(|r| r.path == root) {
        Some(existing) => {
            existing.use_tls = tls;
            existing.preferred_port = port.or(existing.preferred_port);
            println!("Updated {}", root.display());
        }
        None => {
            records.push(ProjectRecord {
                path: root.clone(),
                use_tls: tls,
                preferred_port: port,
            });
            println!("Added {}", root.display());
        }
    }

    store.save(&records).await?;
    Ok(())
}

pub async fn remove(config: ServConfig, folder: PathBuf) -> Result<()> {
    // Match the stored canonical path, falling back to the raw argument for
    // folders that no longer exist on disk.
    let target = folder.canonicalize().unwrap_or(folder);

    let store = ProjectStore::new(&config.data_dir);
    let mut records = store.load().await?;
    let before = records.len();
    records.retain(|r| r.path != target);

    if records.len() == before {
        anyhow::bail!("no saved project at {}", target.display());
    }
    store.save(&records).await?;
    println!("Removed {}", target.display());
    Ok(())
}

pub async fn list(config: ServConfig, json: bool) -> Result<()> {
    let store = ProjectStore::new(&config.data_dir);
    let records = store.load().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No saved projects. Add one with `serv add <folder>`.");
        return Ok(());
    }

    println!("{:<20} {:<6} {:<6} PATH", "NAME", "TLS", "PORT");
    println!("{}", "-".repeat(70));
    for record in &records {
        let name = record
            .path
            .file_name()
            .map(|n| sanitize_name(&n.to_string_lossy()))
            .unwrap_or_else(|| "project".to_string());
        let port = record
            .preferred_port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        let tls = if record.use_tls { "https" } else { "http" };
        println!("{name:<20} {tls:<6} {port:<6} {}", record.path.display());
    }
    println!("\nTotal: {} projects", records.len());
    Ok(())
}
