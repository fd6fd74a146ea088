//! Serve command - bring folders online until interrupted.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serv_core::{ProjectEvent, ProjectRecord, ProjectStatus, ProjectStore, ServConfig};

pub async fn run(
    config: ServConfig,
    folders: Vec<PathBuf>,
    tls: bool,
    port: Option<u16>,
) -> Result<()> {
    let store = ProjectStore::new(&config.data_dir);
    let orchestrator = super::orchestrator(config);

    if folders.is_empty() {
        let records = store.load().await?;
        if records.is_empty() {
            println!("No saved projects. Pass folders to serve or add some with `serv add`.");
            return Ok(());
        }
        orchestrator.restore(records);
    } else {
        for (i, folder) in folders.iter().enumerate() {
            let root = folder
                .canonicalize()
                .with_context(|| format!("cannot serve {}", folder.display()))?;
            let id = orchestrator.add_project(root);
            if tls {
                orchestrator.toggle_tls(id).await?;
            }
            // A single --port only makes sense for a single folder
            if i == 0 {
                if let Some(port) = port {
                    orchestrator.update_config(id, None, Some(port)).await?;
                }
            }
        }
        save_merged(&store, orchestrator.records()).await?;
    }

    for project in orchestrator.projects() {
        orchestrator.start(project.id).await?;
    }

    let suffix = orchestrator.config().local_suffix.clone();
    let mut failures = 0;
    for project in orchestrator.projects() {
        match &project.status {
            ProjectStatus::Running { port } => {
                let url = project
                    .url(&suffix)
                    .unwrap_or_else(|| format!("http://127.0.0.1:{port}"));
                println!("  {}  ->  {url}", project.name);
            }
            ProjectStatus::Error { message } => {
                eprintln!("  {}  failed: {message}", project.name);
                failures += 1;
            }
            _ => {}
        }
    }
    println!("\nPress Ctrl-C to stop.");

    let mut events = orchestrator.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ProjectEvent::HostPublished { hostname, .. }) => {
                    println!("  published {hostname}");
                }
                Ok(ProjectEvent::HostPublishFailed { hostname, reason, .. }) => {
                    eprintln!("  could not publish {hostname}: {reason}");
                }
                Ok(ProjectEvent::StatusChanged { .. }) => {}
                Err(_) => {}
            }
        }
    }

    println!("\nShutting down...");
    orchestrator.stop_all().await;
    // Persist the ports that ended up assigned
    save_merged(&store, orchestrator.records()).await?;

    if failures > 0 {
        anyhow::bail!("{failures} project(s) failed to start");
    }
    Ok(())
}

/// Fold the served projects into the saved list, updating entries that are
/// already there and appending the rest. Projects saved earlier but not
/// served this run are kept.
async fn save_merged(store: &ProjectStore, updates: Vec<ProjectRecord>) -> Result<()> {
    let mut records = store.load().await?;
    for update in updates {
        match records.iter_mut().find(|r| r.path == update.path) {
            Some(existing) => *existing = update,
            None => records.push(update),
        }
    }
    store.save(&records).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_save_merged_keeps_unserved_projects() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());

        let saved = ProjectRecord {
            path: PathBuf::from("/tmp/saved-earlier"),
            use_tls: true,
            preferred_port: Some(9200),
        };
        store.save(std::slice::from_ref(&saved)).await.unwrap();

        save_merged(
            &store,
            vec![ProjectRecord {
                path: PathBuf::from("/tmp/served-now"),
                use_tls: false,
                preferred_port: Some(8100),
            }],
        )
        .await
        .unwrap();

        let records = store.load().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], saved);
        assert_eq!(records[1].path, PathBuf::from("/tmp/served-now"));
    }

    #[tokio::test]
    async fn test_save_merged_updates_existing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProjectStore::new(dir.path());

        store
            .save(&[ProjectRecord {
                path: PathBuf::from("/tmp/site"),
                use_tls: false,
                preferred_port: None,
            }])
            .await
            .unwrap();

        save_merged(
            &store,
            vec![ProjectRecord {
                path: PathBuf::from("/tmp/site"),
                use_tls: true,
                preferred_port: Some(8450),
            }],
        )
        .await
        .unwrap();

        let records = store.load().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].use_tls);
        assert_eq!(records[0].preferred_port, Some(8450));
    }
}
