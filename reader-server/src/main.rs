use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use reader_core::feed::Feed;
use reader_core::poller::{PollConfig, Poller};
use reader_core::storage::{InMemoryStorage, Storage};
use reader_server::api;

const LISTEN_ADDR: &str = "0.0.0.0:8080";
const MIN_LATEST: usize = 30;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "reader", about = "Polls a list of syndication feeds and serves them as JSON")]
struct Cli {
    /// Path to a JSON file containing an array of feed URLs.
    #[arg(long)]
    file: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();

    let raw = match std::fs::read_to_string(&cli.file) {
        Ok(raw) => raw,
        Err(err) => {
            eprintln!("Could not open feed file: {err}");
            return ExitCode::FAILURE;
        }
    };

    let links: Vec<String> = match serde_json::from_str(&raw) {
        Ok(links) => links,
        Err(err) => {
            eprintln!("Could not parse feed file as JSON: {err}");
            return ExitCode::FAILURE;
        }
    };

    let storage = Arc::new(InMemoryStorage::new(MIN_LATEST));

    for link in links {
        let feed_link = match Url::parse(&link) {
            Ok(feed_link) => feed_link,
            Err(err) => {
                warn!(%link, %err, "could not parse feed link as URL");
                continue;
            }
        };

        if let Err(err) = storage.store(Feed::new(feed_link), Vec::new()).await {
            warn!(%err, "could not store feed URL");
        }
    }

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                token.cancel();
            }
        });
    }

    let feeds = match storage.feeds().await {
        Ok(feeds) => feeds,
        Err(err) => {
            error!(%err, "could not retrieve available feeds from storage");
            return ExitCode::FAILURE;
        }
    };

    let poller = Poller::new(storage.clone(), PollConfig::default());
    let mut errors = poller.run(token.clone(), feeds);
    tokio::spawn(async move {
        while let Some(err) = errors.recv().await {
            warn!(error = %err, "error updating feed");
        }
    });

    let listener = match TcpListener::bind(LISTEN_ADDR).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, addr = LISTEN_ADDR, "could not bind listen address");
            return ExitCode::FAILURE;
        }
    };
    info!(addr = LISTEN_ADDR, "read API listening");

    let app = api::router(storage);
    let shutdown = token.clone();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
    });

    tokio::select! {
        _ = token.cancelled() => {}
        result = &mut server => {
            // The listener stopped on its own; nothing left to serve.
            return match result {
                Ok(Ok(())) => ExitCode::SUCCESS,
                Ok(Err(err)) => {
                    error!(%err, "server error");
                    ExitCode::FAILURE
                }
                Err(err) => {
                    error!(%err, "server task failed");
                    ExitCode::FAILURE
                }
            };
        }
    }

    info!("shutting down the server, waiting for remaining requests");

    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(Ok(Ok(()))) => ExitCode::SUCCESS,
        Ok(Ok(Err(err))) => {
            error!(%err, "error shutting down server");
            ExitCode::FAILURE
        }
        Ok(Err(err)) => {
            error!(%err, "server task failed");
            ExitCode::FAILURE
        }
        Err(_) => {
            error!("graceful shutdown timed out, forcing exit");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
