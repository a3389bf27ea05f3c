//! parcelctl - command-line client for Parcel uploads.

mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{Overrides, load_client_config};
use parcel_client::{ApiClient, ProgressFn, UploadError, UploadProgress, Uploader};
use parcel_core::config::ClientConfig;
use parcel_core::{
    ChunkLayout, FileId, FileInfo, FileSource, Fingerprint, SessionView, hash_reader, hash_source,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parcelctl")]
#[command(about = "Resumable chunked uploads to a Parcel server")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    client: ClientArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ClientArgs {
    /// Path to a client config TOML file
    #[arg(long, global = true, env = "PARCEL_CLIENT_CONFIG")]
    config: Option<PathBuf>,

    /// Server base URL (overrides config)
    #[arg(long, global = true)]
    server: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint a file and show its chunk layout
    Hash {
        /// File to hash, or `-` to read standard input
        path: PathBuf,

        /// Chunk size in bytes (overrides config)
        #[arg(long)]
        chunk_size: Option<u64>,
    },

    /// Upload a file, resuming any earlier attempt
    Upload {
        path: PathBuf,

        /// MIME type recorded with the file
        #[arg(long)]
        mime_type: Option<String>,

        /// Chunk size in bytes (overrides config)
        #[arg(long)]
        chunk_size: Option<u64>,

        /// Maximum chunks in flight (overrides config)
        #[arg(long)]
        parallel: Option<usize>,

        /// Do not print progress
        #[arg(long, short, default_value_t = false)]
        quiet: bool,
    },

    /// Show the server's session for a fingerprint or a local file
    Status {
        /// Fingerprint as 64 hex characters
        #[arg(required_unless_present = "path")]
        fingerprint: Option<String>,

        /// Fingerprint this file first
        #[arg(long, conflicts_with = "fingerprint")]
        path: Option<PathBuf>,
    },

    /// List completed files
    List,

    /// Download a completed file
    Download {
        file_id: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a completed file
    Delete { file_id: String },

    /// Check server health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let Cli { client, command } = Cli::parse();

    match command {
        Commands::Hash { path, chunk_size } => {
            let overrides = client.overrides(chunk_size, None);
            let config = load_client_config(client.config.as_deref(), &overrides)?;
            handle_hash(&path, &config, client.json).await
        }
        Commands::Upload {
            path,
            mime_type,
            chunk_size,
            parallel,
            quiet,
        } => {
            let overrides = client.overrides(chunk_size, parallel);
            let config = load_client_config(client.config.as_deref(), &overrides)?;
            handle_upload(&path, mime_type, &config, quiet, client.json).await
        }
        Commands::Status { fingerprint, path } => {
            let config = client.load()?;
            handle_status(fingerprint, path, &config, client.json).await
        }
        Commands::List => handle_list(&client.load()?, client.json).await,
        Commands::Download { file_id, output } => {
            handle_download(&file_id, output.as_deref(), &client.load()?).await
        }
        Commands::Delete { file_id } => handle_delete(&file_id, &client.load()?).await,
        Commands::Health => handle_health(&client.load()?, client.json).await,
    }
}

impl ClientArgs {
    fn overrides(&self, chunk_size: Option<u64>, max_parallel: Option<usize>) -> Overrides {
        Overrides {
            server_url: self.server.clone(),
            chunk_size,
            max_parallel,
        }
    }

    fn load(&self) -> Result<ClientConfig> {
        load_client_config(self.config.as_deref(), &self.overrides(None, None))
    }
}

fn uploader(config: &ClientConfig) -> Result<Uploader> {
    let client = ApiClient::new(&config.server_url)?;
    Ok(Uploader::new(Arc::new(client), config)?)
}

/// Fingerprint a file off the async runtime.
async fn fingerprint_file(path: &Path, window: usize) -> Result<(Fingerprint, u64)> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(Fingerprint, u64)> {
        let source = FileSource::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let fingerprint = hash_source(&source, window, |_| {})?;
        Ok((fingerprint, parcel_core::ByteSource::size(&source)))
    })
    .await
    .context("hashing task failed")?
}

/// Reader that counts the bytes passing through it.
struct Counted<R> {
    inner: R,
    bytes: u64,
}

impl<R: Read> Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Fingerprint a forward-only stream, returning the digest and its length.
fn fingerprint_reader<R: Read>(reader: R, window: usize) -> Result<(Fingerprint, u64)> {
    let mut counted = Counted {
        inner: reader,
        bytes: 0,
    };
    let fingerprint = hash_reader(&mut counted, None, window, |_| {})?;
    Ok((fingerprint, counted.bytes))
}

async fn fingerprint_stdin(window: usize) -> Result<(Fingerprint, u64)> {
    tokio::task::spawn_blocking(move || fingerprint_reader(std::io::stdin().lock(), window))
        .await
        .context("hashing task failed")?
}

async fn handle_hash(path: &Path, config: &ClientConfig, json: bool) -> Result<()> {
    let (fingerprint, size) = if path == Path::new("-") {
        fingerprint_stdin(config.hash_window).await?
    } else {
        fingerprint_file(path, config.hash_window).await?
    };
    let total_chunks = match ChunkLayout::new(size, config.chunk_size) {
        Ok(layout) => layout.total_chunks(),
        Err(_) => 0,
    };

    if json {
        println!(
            "{}",
            serde_json::json!({
                "fingerprint": fingerprint,
                "size": size,
                "chunk_size": config.chunk_size,
                "total_chunks": total_chunks,
            })
        );
    } else {
        println!("Fingerprint: {fingerprint}");
        println!("Size: {} ({size} bytes)", format_size(size));
        println!(
            "Chunks: {total_chunks} x {}",
            format_size(config.chunk_size)
        );
    }
    Ok(())
}

async fn handle_upload(
    path: &Path,
    mime_type: Option<String>,
    config: &ClientConfig,
    quiet: bool,
    json: bool,
) -> Result<()> {
    let uploader = uploader(config)?;
    tracing::debug!(
        server = %config.server_url,
        chunk_size = config.chunk_size,
        max_parallel = config.max_parallel,
        "starting upload"
    );

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupted, stopping upload...");
                cancel.cancel();
            }
        })
    };

    let progress = if quiet || json {
        parcel_client::no_progress()
    } else {
        progress_printer()
    };
    let outcome = uploader.upload_path(path, mime_type, progress, cancel).await;
    interrupt.abort();
    if !quiet && !json {
        eprintln!();
    }

    let result = match outcome {
        Ok(result) => result,
        Err(UploadError::Cancelled) => {
            anyhow::bail!("upload cancelled; run the same command again to resume")
        }
        Err(e) => return Err(e).with_context(|| format!("failed to upload {}", path.display())),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("Upload complete!");
        println!("File ID: {}", result.file_id);
        println!("Fingerprint: {}", result.fingerprint);
        println!("Size: {}", format_size(result.size));
        println!("Download: {}", result.download_reference);
    }
    Ok(())
}

async fn handle_status(
    fingerprint: Option<String>,
    path: Option<PathBuf>,
    config: &ClientConfig,
    json: bool,
) -> Result<()> {
    let fingerprint = match (fingerprint, path) {
        (Some(hex), _) => Fingerprint::from_hex(&hex)?,
        (None, Some(path)) => fingerprint_file(&path, config.hash_window).await?.0,
        (None, None) => anyhow::bail!("specify a fingerprint or --path"),
    };

    let view = uploader(config)?.resume_status(&fingerprint).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_session(&view);
    }
    Ok(())
}

fn print_session(view: &SessionView) {
    let received = view.received_chunk_indices.len() as u64;
    println!("Fingerprint: {}", view.fingerprint);
    println!("Status: {}", view.status);
    println!("Size: {}", format_size(view.total_size));
    println!(
        "Chunks: {received}/{} received ({} each)",
        view.total_chunks,
        format_size(view.chunk_size)
    );
    let missing = view.missing_chunks();
    if !missing.is_empty() {
        println!("Missing: {}", summarize_indices(&missing));
    }
}

async fn handle_list(config: &ClientConfig, json: bool) -> Result<()> {
    let files = ApiClient::new(&config.server_url)?.list_files().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&files)?);
        return Ok(());
    }
    if files.is_empty() {
        println!("No files found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:>10}  {:<25}  NAME",
        "FILE ID", "SIZE", "COMPLETED"
    );
    println!("{}", "-".repeat(90));
    for info in &files {
        println!("{}", list_row(info));
    }
    Ok(())
}

fn list_row(info: &FileInfo) -> String {
    let completed = info
        .completed_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| info.completed_at.to_string());
    format!(
        "{:<36}  {:>10}  {:<25}  {}",
        info.file_id,
        format_size(info.size),
        completed,
        info.file_name.as_deref().unwrap_or("-")
    )
}

async fn handle_download(file_id: &str, output: Option<&Path>, config: &ClientConfig) -> Result<()> {
    let file_id = FileId::parse(file_id)?;
    let client = ApiClient::new(&config.server_url)?;

    match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            let written = client.download_to(&file_id, &mut file).await?;
            file.flush().await?;
            eprintln!("Wrote {} to {}", format_size(written), path.display());
        }
        None => {
            let mut stdout = tokio::io::stdout();
            client.download_to(&file_id, &mut stdout).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

async fn handle_delete(file_id: &str, config: &ClientConfig) -> Result<()> {
    let file_id = FileId::parse(file_id)?;
    ApiClient::new(&config.server_url)?
        .delete_file(&file_id)
        .await?;
    println!("Deleted {file_id}");
    Ok(())
}

async fn handle_health(config: &ClientConfig, json: bool) -> Result<()> {
    let health = ApiClient::new(&config.server_url)?.health().await?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "status": health.status, "version": health.version })
        );
    } else {
        println!("Server: {}", config.server_url);
        println!("Status: {}", health.status);
        println!("Version: {}", health.version);
    }
    Ok(())
}

/// Progress callback that redraws a single status line on stderr.
fn progress_printer() -> ProgressFn {
    let last = Mutex::new(None::<String>);
    Arc::new(move |event: UploadProgress| {
        let line = progress_line(&event);
        let Ok(mut last) = last.lock() else {
            return;
        };
        if last.as_deref() != Some(line.as_str()) {
            eprint!("\r{line}");
            *last = Some(line);
        }
    })
}

fn progress_line(event: &UploadProgress) -> String {
    match *event {
        UploadProgress::Hashing { percent } => format!("Hashing... {percent:>3}%"),
        UploadProgress::Uploading {
            acknowledged,
            total,
            percent,
        } => format!("Uploading... {percent:>3}% ({acknowledged}/{total} chunks)"),
    }
}

/// Collapse sorted indices into ranges, e.g. `0-2, 5, 7-8`.
fn summarize_indices(indices: &[u64]) -> String {
    let mut parts = Vec::new();
    let mut iter = indices.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
    }
    parts.join(", ")
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
