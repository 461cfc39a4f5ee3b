//! vaultup command-line uploader.
//!
//! Encrypts and uploads local files into a directory that stands in for the
//! destination storage instance.

mod dir_transport;
mod flaky;
mod keys;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use vaultup_protocol::{DestinationId, QueueChange, QueueEvent, UploadId, UploadStatus};
use vaultup_transfer::KeyMaterial;
use vaultup_upload_queue::{
    KeyMaterialProvider, NewUpload, StaticKeyProvider, Transport, UploadService, UploaderSettings,
    settings_path,
};

use dir_transport::DirTransport;
use flaky::FlakyTransport;
use keys::PassphraseKeys;

#[derive(Parser)]
#[command(name = "vaultup-cli", version, about = "Encrypted chunked uploader")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files to a destination directory
    Upload(UploadArgs),
    /// Print the effective uploader settings
    Settings,
}

#[derive(Args)]
struct UploadArgs {
    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Destination identity (also binds the encryption key)
    #[arg(long)]
    dest: String,

    /// Directory receiving the encrypted chunks
    #[arg(long)]
    out: PathBuf,

    /// Passphrase the destination key is derived from
    #[arg(
        long,
        env = "VAULTUP_PASSPHRASE",
        hide_env_values = true,
        required_unless_present = "key_hex",
        conflicts_with = "key_hex"
    )]
    passphrase: Option<String>,

    /// Raw 32-byte chunk key, hex encoded
    #[arg(long, env = "VAULTUP_KEY_HEX", hide_env_values = true)]
    key_hex: Option<String>,

    /// Chunk size in bytes (overrides settings)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Files transferred at once (overrides settings)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Reject every Nth chunk call with a transient error
    #[arg(long, value_name = "N")]
    simulate_transient: Option<u64>,

    /// Print the final queue snapshot as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,vaultup=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Upload(args) => upload(args).await,
        Commands::Settings => show_settings(),
    }
}

fn show_settings() -> anyhow::Result<()> {
    let settings = UploaderSettings::load().context("failed to load settings")?;
    println!("# {}", settings_path().display());
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

async fn upload(args: UploadArgs) -> anyhow::Result<()> {
    let mut settings = UploaderSettings::load().context("failed to load settings")?;
    if let Some(chunk_size) = args.chunk_size {
        settings.chunk_size = chunk_size;
    }
    if let Some(concurrency) = args.concurrency {
        settings.concurrency = concurrency;
    }

    let dir = DirTransport::new(&args.out)
        .with_context(|| format!("cannot create output directory {}", args.out.display()))?;
    let transport: Arc<dyn Transport> = match args.simulate_transient {
        Some(every) => Arc::new(FlakyTransport::new(dir, every)),
        None => Arc::new(dir),
    };

    let keys = key_provider(args.passphrase, args.key_hex.as_deref())?;
    let service = UploadService::builder(DestinationId::new(args.dest), transport, keys)
    .settings(settings)
    .build();

    let uploads = args
        .files
        .iter()
        .map(|path| {
            NewUpload::local(path, guess_mime(path))
                .with_context(|| format!("cannot read {}", path.display()))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut events = service.subscribe();
    let ids = service.enqueue(uploads);
    tracing::info!(
        files = ids.len(),
        destination = %service.destination(),
        chunk_size = service.settings().chunk_size,
        concurrency = service.settings().concurrency,
        "upload started"
    );

    let mut interrupted = false;
    while !all_finished(&service, &ids) {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "progress output fell behind");
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                let cancelled = service.cancel_all();
                tracing::warn!(cancelled, "interrupted, cancelling uploads");
            }
        }
    }

    let snapshot = service.snapshot();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!();
        for item in &snapshot {
            match &item.status {
                UploadStatus::Completed { content_id } => {
                    println!("ok        {}  {}", item.name, content_id);
                }
                UploadStatus::Failed { error, retriable } => {
                    let hint = if *retriable { " (retriable)" } else { "" };
                    println!("failed    {}  {error}{hint}", item.name);
                }
                other => println!("{:<9} {}", other.label(), item.name),
            }
        }
    }

    let progress = service.progress();
    println!(
        "{}/{} files, {}/{} bytes",
        progress.completed_files,
        progress.total_files,
        progress.transferred_bytes,
        progress.total_bytes
    );

    let failed = snapshot
        .iter()
        .filter(|i| matches!(i.status, UploadStatus::Failed { .. }))
        .count();
    if failed > 0 {
        anyhow::bail!("{failed} upload(s) failed");
    }
    Ok(())
}

fn key_provider(
    passphrase: Option<String>,
    key_hex: Option<&str>,
) -> anyhow::Result<Arc<dyn KeyMaterialProvider>> {
    if let Some(encoded) = key_hex {
        let key = KeyMaterial::from_hex(encoded).context("invalid --key-hex")?;
        key.validate().context("invalid --key-hex")?;
        return Ok(Arc::new(StaticKeyProvider::new(key)));
    }
    let passphrase = passphrase.context("either --passphrase or --key-hex is required")?;
    Ok(Arc::new(PassphraseKeys::new(passphrase)))
}

fn all_finished(service: &UploadService, ids: &[UploadId]) -> bool {
    ids.iter()
        .all(|id| service.get(*id).is_none_or(|item| item.status.is_finished()))
}

fn print_event(event: &QueueEvent) {
    let QueueChange::Updated { item } = &event.change else {
        return;
    };
    eprintln!(
        "[{:>5.1}%] {:<24} {:<9} {:>5.1}%",
        event.progress.overall_progress,
        item.name,
        item.status.label(),
        item.percentage()
    );
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "pdf" => "application/pdf",
        "txt" | "md" => "text/plain",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}
