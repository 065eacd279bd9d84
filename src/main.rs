//! lexicard command line tool.
//!
//! Fetches dictionary pages for a word list or downloads pronunciation audio
//! for a URL list through the bounded, throttled dispatcher, then writes a
//! report of everything that could not be fetched.

mod config;

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lexicard_dispatch::{unit::dictionary_page_url, Dispatcher, FailureReporter, WorkUnit};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "lexicard", version, about = "Fetch dictionary pages and pronunciation audio")]
struct Cli {
    /// Configuration file, `lexicard.toml` by default.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the number of concurrent requests.
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch the dictionary page of every word in a file.
    Fetch {
        /// One word per line; defaults to the configured words file.
        words_file: Option<PathBuf>,
    },
    /// Download every audio URL in a file into the media directory.
    Download {
        /// One URL per line; defaults to the configured URLs file.
        urls_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(max_concurrent) = cli.max_concurrent {
        config.max_concurrent = max_concurrent;
    }

    init_tracing(&config.log)?;
    info!(
        max_concurrent = config.max_concurrent,
        max_retries = config.max_retries,
        failed_log = %config.failed_log.display(),
        "configuration loaded"
    );

    let dispatcher =
        Dispatcher::start(config.to_dispatch_config()).context("failed to start dispatcher")?;

    let page_writes = TaskTracker::new();
    let enqueued = match cli.command {
        Command::Fetch { words_file } => {
            let path = words_file.unwrap_or_else(|| config.words_file.clone());
            enqueue_pages(&dispatcher, &config, &path, &page_writes).await?
        },
        Command::Download { urls_file } => {
            let path = urls_file.unwrap_or_else(|| config.urls_file.clone());
            enqueue_downloads(&dispatcher, &config, &path).await?
        },
    };
    info!(enqueued, "work enqueued, waiting for drain");

    tokio::select! {
        () = dispatcher.wait_for_drain() => {
            info!("all work finished");
        }
        () = shutdown_signal() => {
            warn!("interrupted before all work finished");
        }
    }

    page_writes.close();
    page_writes.wait().await;

    let failed = dispatcher.collect_failed();
    let stats = dispatcher.stats();
    let reported = FailureReporter::new(&config.failed_log)
        .report(&failed)
        .context("failed to write failure report")?;

    dispatcher.shutdown().await.context("dispatcher did not shut down cleanly")?;

    info!(
        delivered = stats.delivered,
        skipped = stats.skipped,
        retried = stats.retried,
        failed = reported,
        "lexicard finished"
    );
    Ok(())
}

/// Initializes tracing with `RUST_LOG`, falling back to the configured
/// filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("invalid log filter")?;

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Enqueues one page unit per distinct word. Returns the number enqueued.
///
/// Handlers run on the dispatcher's attempt tasks, so each page is written
/// by a task spawned on `page_writes`.
async fn enqueue_pages(
    dispatcher: &Dispatcher,
    config: &AppConfig,
    words: &Path,
    page_writes: &TaskTracker,
) -> Result<usize> {
    let contents = tokio::fs::read_to_string(words)
        .await
        .with_context(|| format!("failed to read words from {}", words.display()))?;
    tokio::fs::create_dir_all(&config.pages_dir)
        .await
        .with_context(|| format!("failed to create {}", config.pages_dir.display()))?;

    let mut enqueued = 0;
    for word in distinct_lines(&contents) {
        let url = dictionary_page_url(&config.dictionary_base_url, word);
        let page_path = config.pages_dir.join(format!("{}.html", page_file_stem(word)));
        let word_owned = word.to_string();
        let writes = page_writes.clone();

        let unit = match WorkUnit::page(&url, move |html| {
            writes.spawn(save_page(word_owned, page_path, html));
        }) {
            Ok(unit) => unit.with_retries(config.max_retries),
            Err(e) => {
                warn!(word, error = %e, "skipping word");
                continue;
            },
        };
        dispatcher.enqueue(unit);
        enqueued += 1;
    }
    Ok(enqueued)
}

/// Enqueues one download per valid URL. Returns the number enqueued.
async fn enqueue_downloads(
    dispatcher: &Dispatcher,
    config: &AppConfig,
    urls: &Path,
) -> Result<usize> {
    let contents = tokio::fs::read_to_string(urls)
        .await
        .with_context(|| format!("failed to read URLs from {}", urls.display()))?;
    tokio::fs::create_dir_all(&config.media_dir)
        .await
        .with_context(|| format!("failed to create {}", config.media_dir.display()))?;

    let mut enqueued = 0;
    for url in distinct_lines(&contents) {
        match WorkUnit::download(url, &config.media_dir) {
            Ok(unit) => {
                dispatcher.enqueue(unit.with_retries(config.max_retries));
                enqueued += 1;
            },
            Err(e) => warn!(url, error = %e, "skipping invalid download URL"),
        }
    }
    Ok(enqueued)
}

async fn save_page(word: String, path: PathBuf, html: String) {
    match tokio::fs::write(&path, &html).await {
        Ok(()) => info!(word, path = %path.display(), bytes = html.len(), "page saved"),
        Err(e) => error!(word, path = %path.display(), error = %e, "failed to save page"),
    }
}

/// Trimmed, non-blank lines in first-seen order, without duplicates.
fn distinct_lines(contents: &str) -> Vec<&str> {
    let mut seen = HashSet::new();
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(*line))
        .collect()
}

/// File-system safe stem for a word's page.
fn page_file_stem(word: &str) -> String {
    word.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '\'' { c } else { '-' })
        .collect()
}

/// Waits for CTRL+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received CTRL+C");
        },
        () = terminate => {
            info!("received SIGTERM");
        },
    }
}
