//! Serv CLI - Serve local folders over HTTP/HTTPS
//!
//! A command-line tool for exposing folders as local web endpoints with
//! automatic port assignment, locally-trusted TLS, and `.local` hostnames.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "serv")]
#[command(author, version, about = "Serve local folders over HTTP/HTTPS")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Data directory (defaults to ~/.serv)
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve folders until interrupted
    #[command(alias = "up")]
    Serve {
        /// Folders to serve; defaults to all saved projects
        folders: Vec<PathBuf>,

        /// Serve over HTTPS with a locally-trusted certificate
        #[arg(long)]
        tls: bool,

        /// Preferred port for the first folder
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Save a folder as a project without serving it
    Add {
        folder: PathBuf,

        /// Serve over HTTPS with a locally-trusted certificate
        #[arg(long)]
        tls: bool,

        /// Preferred port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Remove a saved project
    #[command(alias = "rm")]
    Remove { folder: PathBuf },

    /// List saved projects
    #[command(alias = "ls")]
    List,

    /// Generate the local certificate authority and install trust
    Trust,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = commands::config(cli.data_dir)?;

    match cli.command {
        Some(Commands::Serve { folders, tls, port }) => {
            commands::serve::run(config, folders, tls, port).await?;
        }
        Some(Commands::Add { folder, tls, port }) => {
            commands::projects::add(config, folder, tls, port).await?;
        }
        Some(Commands::Remove { folder }) => {
            commands::projects::remove(config, folder).await?;
        }
        Some(Commands::List) => {
            commands::projects::list(config, cli.json).await?;
        }
        Some(Commands::Trust) => {
            commands::trust::run(config).await?;
        }
        None => {
            commands::projects::list(config, cli.json).await?;
        }
    }

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("serv=info,serv_core=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
