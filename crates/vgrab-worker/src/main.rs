//! vgrab command-line binary.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgrab_media::validate_cookie_jar;
use vgrab_models::{ContentKey, ErrorResponse, PipelineRequest};
use vgrab_storage::{BlobStoreConfig, CacheStore, FsCacheStore};
use vgrab_worker::{metrics, Pipeline, PipelineConfig, PipelineResult};

#[derive(Parser, Debug)]
#[command(name = "vgrab")]
#[command(about = "Download, transcode and cache online videos", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one request and print the JSON result
    Fetch {
        /// Source video URL
        url: String,
        /// Trim start in seconds
        #[arg(long, requires = "end")]
        start: Option<f64>,
        /// Trim end in seconds
        #[arg(long, requires = "start")]
        end: Option<f64>,
    },
    /// Run JSON-lines requests from a file (stdin by default)
    Batch {
        file: Option<PathBuf>,
    },
    /// Remove the cache entry for a URL
    Evict {
        url: String,
    },
    /// Check tools, directories, cookie jar and storage settings
    Selfcheck,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Output<T: Serialize> {
    Ok(T),
    Err(ErrorResponse),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let config = PipelineConfig::from_env();

    match cli.command {
        Command::Fetch { url, start, end } => {
            let mut request = PipelineRequest::new(url);
            request.trim_start = start;
            request.trim_end = end;
            fetch(config, request).await
        }
        Command::Batch { file } => batch(config, file.as_deref()).await,
        Command::Evict { url } => evict(&config, &url).await,
        Command::Selfcheck => selfcheck(&config).await,
    }
}

/// Colored output for dev, JSON for production; always on stderr.
fn init_tracing() -> Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::from_default_env().add_directive("vgrab=info".parse::<Directive>()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

async fn build_pipeline(config: PipelineConfig) -> Result<Pipeline> {
    let storage = BlobStoreConfig::from_env()?;
    Ok(Pipeline::from_config(config, &storage).await?)
}

/// Cancel channel flipped by Ctrl-C.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, cancelling");
            let _ = tx.send(true);
        }
    });
    rx
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn to_output<T: Serialize>(result: PipelineResult<T>) -> Output<T> {
    match result {
        Ok(value) => Output::Ok(value),
        Err(e) => Output::Err(e.to_response()),
    }
}

async fn fetch(config: PipelineConfig, request: PipelineRequest) -> Result<()> {
    let pipeline = build_pipeline(config).await?;
    let result = pipeline
        .process_with_cancel(&request, cancel_on_ctrl_c())
        .await;

    let failed = result.is_err();
    if let Err(e) = &result {
        error!(kind = e.kind(), "Request failed: {}", e);
    }
    print_json(&to_output(result))?;

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn batch(config: PipelineConfig, file: Option<&Path>) -> Result<()> {
    if let Ok(addr) = std::env::var("METRICS_ADDR") {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid METRICS_ADDR {}", addr))?;
        metrics::init_metrics(addr)?;
        info!(%addr, "Serving Prometheus metrics");
    }

    let reader: Box<dyn AsyncRead + Send + Unpin> = match file {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("cannot open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let pipeline = Arc::new(build_pipeline(config).await?);
    let cancel_rx = cancel_on_ctrl_c();

    let mut lines = BufReader::new(reader).lines();
    let mut tasks = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: PipelineRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Skipping malformed request line");
                tasks.push(tokio::spawn(async move {
                    Output::Err(ErrorResponse {
                        error_kind: "precondition".to_string(),
                        detail: format!("malformed request: {}", e),
                    })
                }));
                continue;
            }
        };

        let pipeline = Arc::clone(&pipeline);
        let cancel_rx = cancel_rx.clone();
        tasks.push(tokio::spawn(async move {
            to_output(pipeline.process_with_cancel(&request, cancel_rx).await)
        }));
    }

    // One output line per input line, in input order
    for outcome in futures::future::join_all(tasks).await {
        let outcome = outcome.map_err(|e| anyhow!("request task panicked: {}", e))?;
        print_json(&outcome)?;
    }
    Ok(())
}

async fn evict(config: &PipelineConfig, url: &str) -> Result<()> {
    let key = ContentKey::from_source_url(url)?;
    let removed = FsCacheStore::new(&config.cache_dir).remove(&key).await?;

    info!(key = %key, removed = removed, "Evicted cache entry");
    print_json(&serde_json::json!({ "key": key, "removed": removed }))
}

async fn selfcheck(config: &PipelineConfig) -> Result<()> {
    println!(
        "vgrab selfcheck: starting with work_dir={}",
        config.work_dir.display()
    );

    config.tools.check_tools()?;
    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("work dir {} not writable", config.work_dir.display()))?;
    tokio::fs::create_dir_all(&config.cache_dir)
        .await
        .with_context(|| format!("cache dir {} not writable", config.cache_dir.display()))?;
    validate_cookie_jar(&config.cookies_path).await?;
    BlobStoreConfig::from_env()?;

    println!("vgrab selfcheck: ok");
    Ok(())
}
