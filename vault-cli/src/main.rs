use std::{io, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vault::{
    config::VaultConfig,
    imap::ImapRemoteBuilder,
    mbox::MboxWriter,
    remote::{Remote, RemoteBuilder},
    sync::SyncBuilder,
    Archive,
};

#[derive(Debug, Parser)]
#[command(name = "vault", author, version, propagate_version = true)]
#[command(about = "Keep an append-only archive of a Gmail mailbox", long_about = None)]
struct Cli {
    /// Override the default configuration file path.
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Trace every IMAP exchange.
    #[arg(long, global = true)]
    trace: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List remote folders.
    List,

    /// Archive new messages and label changes.
    Fetch,

    /// Write the archive to the standard output as mbox.
    Mbox {
        /// Also write deleted messages.
        #[arg(long)]
        include_deleted: bool,
    },

    /// Check the content hash of every archived record.
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.trace);

    let config = VaultConfig::from_some_path(cli.config.as_ref())
        .context("cannot load configuration")?;

    match cli.cmd {
        Command::List => list(&config, cli.trace).await,
        Command::Fetch => fetch(&config, cli.trace).await,
        Command::Mbox { include_deleted } => mbox(&config, include_deleted).await,
        Command::Validate => validate(&config).await,
    }
}

fn init_tracing(trace: bool) {
    let filter = if trace {
        EnvFilter::new("vault=trace,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn open_archive(config: &VaultConfig, read_only: bool) -> Result<Arc<Archive>> {
    let path = config.vault_path();
    info!(?path, read_only, "scanning archive");

    let archive = task::spawn_blocking(move || {
        if read_only {
            Archive::open_read_only(path)
        } else {
            Archive::open(path)
        }
    })
    .await?
    .context("cannot open archive")?;

    info!("have {} messages", archive.count());
    Ok(Arc::new(archive))
}

async fn remote_builder(config: &VaultConfig, trace: bool) -> Result<ImapRemoteBuilder> {
    let password = config.password().await.context("cannot get password")?;
    Ok(ImapRemoteBuilder::from_config(config, password).with_trace(trace))
}

async fn list(config: &VaultConfig, trace: bool) -> Result<()> {
    let mut remote = remote_builder(config, trace).await?.build().await?;

    for name in remote.list_mailboxes().await? {
        println!("{name}");
    }

    Ok(())
}

async fn fetch(config: &VaultConfig, trace: bool) -> Result<()> {
    let archive = open_archive(config, false).await?;
    let builder = remote_builder(config, trace).await?;

    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping synchronization");
                token.cancel();
            }
        }
    });

    let report = SyncBuilder::new(builder, archive.clone())
        .with_connections(config.connections())
        .with_cancellation_token(token)
        .sync()
        .await
        .context("cannot synchronize archive")?;

    for (item, err) in &report.failures {
        warn!(id = item.message_id, "{err}");
    }

    info!("have {} messages", archive.count());
    Ok(())
}

async fn mbox(config: &VaultConfig, include_deleted: bool) -> Result<()> {
    let archive = open_archive(config, true).await?;

    let written = task::spawn_blocking(move || {
        MboxWriter::new(&archive)
            .with_include_deleted(include_deleted)
            .write(io::stdout().lock())
    })
    .await??;

    info!("wrote {written} messages to stdout");
    Ok(())
}

async fn validate(config: &VaultConfig) -> Result<()> {
    let archive = open_archive(config, true).await?;

    let validated = task::spawn_blocking(move || archive.validate())
        .await?
        .context("cannot validate archive")?;

    info!("validated {validated} messages");
    Ok(())
}
