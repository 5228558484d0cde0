use anyhow::Context;
use clap::{Parser, Subcommand};
use imgcache::config::Config;
use imgcache::logging::{init_subscriber, LogFormat};
use imgcache::ImageFetcher;
use std::io::Write;
use std::path::PathBuf;

/// imgcache - fetch images through a persistent on-disk HTTP cache
#[derive(Parser, Debug)]
#[command(name = "imgcache")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch an image, writing its bytes to stdout or a file
    Fetch {
        url: String,

        /// Serve from cache only, never touching the network
        #[arg(long)]
        offline: bool,

        /// Write the body here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete superseded body files that are no longer in use
    Cleanup,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let format = if args.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    init_subscriber(format).map_err(|e| anyhow::anyhow!(e))?;

    let config = match &args.config {
        Some(path) => Config::from_file(path).map_err(|e| anyhow::anyhow!(e))?,
        None => Config::default(),
    };

    tracing::info!(
        cache_dir = %config.cache.dir.display(),
        save_delay_ms = config.cache.save_delay_ms,
        "Configuration loaded"
    );

    let fetcher = ImageFetcher::shared(&config).await?;

    let outcome = run(fetcher, args.command).await;
    fetcher.shutdown().await;
    outcome
}

async fn run(fetcher: &ImageFetcher, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Fetch {
            url,
            offline,
            output,
        } => {
            let body = fetcher.fetch(&url, !offline).await?;
            match output {
                Some(path) => tokio::fs::write(&path, &body)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?,
                None => std::io::stdout()
                    .lock()
                    .write_all(&body)
                    .context("failed to write to stdout")?,
            }
        }
        Command::Cleanup => {
            let reclaimed = fetcher.cleanup().await;
            tracing::info!(reclaimed, "Cleanup finished");
        }
    }
    Ok(())
}
