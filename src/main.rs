use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docrag::{
    api, config, logging,
    ingestion::{IngestionFailure, UploadedFile},
    pipeline::{PipelineApi, PipelineError, RagPipeline},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "docrag",
    about = "Ask questions about your documents with retrieval-augmented generation"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default).
    Serve,
    /// Ingest files or directories and index their contents.
    Ingest {
        /// Files or directories; directories are walked recursively.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Ask a question against the persisted index.
    Ask {
        /// Question to answer.
        question: String,
        /// Conversation thread to continue.
        #[arg(long)]
        thread: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = config::init_config().context("failed to load configuration")?;
    logging::init_tracing();
    let pipeline = Arc::new(RagPipeline::from_config(config)?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(pipeline).await,
        Command::Ingest { paths } => ingest(&pipeline, &paths).await,
        Command::Ask { question, thread } => {
            let response = pipeline.ask(&question, thread.as_deref()).await?;
            println!("{}", response.answer);
            if !response.sources.is_empty() {
                println!("\nSources: {}", response.sources.join(", "));
            }
            if let Some(thread_id) = response.thread_id {
                println!("Thread: {thread_id}");
            }
            Ok(())
        }
    }
}

async fn serve(pipeline: Arc<RagPipeline>) -> Result<()> {
    match pipeline.restore_index().await {
        Ok(true) => {}
        Ok(false) => tracing::info!("No persisted index; waiting for uploads"),
        Err(err) => tracing::warn!(error = %err, "Failed to restore persisted index"),
    }
    let app = api::create_router(pipeline);

    let (listener, port) = bind_listener().await.context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ingest(pipeline: &RagPipeline, paths: &[PathBuf]) -> Result<()> {
    let (files, unreadable) = read_uploads(&collect_files(paths)).await;
    if files.is_empty() {
        if unreadable.is_empty() {
            bail!("no files found under the given paths");
        }
        println!("{}", serde_json::to_string_pretty(&unreadable)?);
        bail!("none of the given files could be read");
    }

    let mut report = match pipeline.ingest(files).await {
        Ok(report) => report,
        Err(PipelineError::NothingIngested { mut failures }) => {
            failures.extend(unreadable);
            println!("{}", serde_json::to_string_pretty(&failures)?);
            bail!("none of the given files could be ingested");
        }
        Err(err) => return Err(err.into()),
    };
    report.failures.extend(unreadable);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Read every path into an upload; unreadable files become failures instead of aborting.
async fn read_uploads(paths: &[PathBuf]) -> (Vec<UploadedFile>, Vec<IngestionFailure>) {
    let mut files = Vec::new();
    let mut failures = Vec::new();
    for path in paths {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        match tokio::fs::read(path).await {
            // Empty content type lets ingestion guess from the extension.
            Ok(bytes) => files.push(UploadedFile::new(filename, String::new(), bytes)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Skipping unreadable file");
                failures.push(IngestionFailure {
                    filename,
                    reason: format!("failed to read {}: {err}", path.display()),
                });
            }
        }
    }
    (files, failures)
}

fn collect_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            files.extend(
                WalkDir::new(path)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(|entry| match entry {
                        Ok(entry) => Some(entry),
                        Err(err) => {
                            tracing::warn!(error = %err, "Skipping unreadable entry");
                            None
                        }
                    })
                    .filter(|entry| entry.file_type().is_file() && !is_hidden(entry.path()))
                    .map(|entry| entry.into_path()),
            );
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        "No available port found in range 4100-4199",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreadable_paths_are_reported_alongside_readable_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("notes.txt"), b"hello").expect("write");
        std::fs::write(dir.path().join(".hidden.txt"), b"secret").expect("write");
        let missing = dir.path().join("missing.pdf");

        let paths = collect_files(&[dir.path().to_path_buf(), missing]);
        let (files, failures) = read_uploads(&paths).await;

        let names: Vec<&str> = files.iter().map(|file| file.filename.as_str()).collect();
        assert_eq!(names, vec!["notes.txt"]);
        assert_eq!(files[0].bytes, b"hello");
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].filename, "missing.pdf");
        assert!(failures[0].reason.contains("missing.pdf"));
    }

    #[test]
    fn hidden_files_are_detected_by_leading_dot() {
        assert!(is_hidden(Path::new("docs/.DS_Store")));
        assert!(!is_hidden(Path::new("docs/report.pdf")));
    }
}
