//! synmod daemon: hosts one modulation network behind a JSON-lines TCP socket.
//!
//! Storage locations:
//! - Linux: ~/.local/share/synmod/
//! - Windows: %APPDATA%\synmod\
//! - MacOS: ~/Library/Application Support/synmod/
//!
//! `SYNMOD_DATA_DIR` overrides the platform directory.

use std::sync::Arc;
use std::time::Duration;

use synmod::observer::{DiagnosticSink, TracingSink};
use synmod::store::{MetricsStore, StateStore};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio::time;
use tracing::{error, info};

mod config;
mod driver;
mod logging;
mod paths;
mod protocol;
mod store;

use config::DaemonConfig;
use driver::Driver;
use paths::AppPaths;
use protocol::{handle_request, Request, Response};
use store::{FileMetricsStore, FileStateStore};

async fn write_response(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    response: &Response,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    writer
        .write_all(serde_json::to_string(response)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

async fn handle_client(
    stream: TcpStream,
    driver: Arc<RwLock<Driver>>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let resp = Response::error(format!("Invalid request: {e}"));
                write_response(&mut writer, &resp).await?;
                continue;
            }
        };

        let shutdown = matches!(request, Request::Shutdown);
        let response = handle_request(&driver, request).await;
        write_response(&mut writer, &response).await?;

        if shutdown {
            info!("Shutdown requested");
            tokio::spawn(async {
                // Give the response a moment to flush before exiting.
                time::sleep(Duration::from_millis(50)).await;
                std::process::exit(0);
            });
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let paths = AppPaths::new()?;
    let cfg = DaemonConfig::resolve(&paths.config_file())?;
    let _log_guard = logging::init_logging(&cfg.logging, &paths.log_dir())?;

    info!("Data directory: {:?}", paths.data_dir());
    info!(network_id = %cfg.storage.network_id, "starting synmodd");

    let states: Arc<dyn StateStore> =
        Arc::new(FileStateStore::new(paths.collection_dir(&cfg.storage.collection_name)));
    let metrics: Arc<dyn MetricsStore> = Arc::new(FileMetricsStore::new(
        paths.collection_dir(&cfg.storage.performance_collection),
    ));
    let sink: Arc<dyn DiagnosticSink> = Arc::new(TracingSink);

    let driver = Driver::open(&cfg, states, metrics, sink)?;
    let driver = Arc::new(RwLock::new(driver));

    // Save on Ctrl-C so state persists even if the daemon is stopped abruptly.
    {
        let driver = Arc::clone(&driver);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let mut d = driver.write().await;
                match d.persist_and_settle().await {
                    Ok(()) => info!(step = d.network().step_count(), "Ctrl-C: state saved"),
                    Err(e) => error!("Ctrl-C: final save failed: {e}"),
                }
                std::process::exit(0);
            }
        });
    }

    let listener = TcpListener::bind(&cfg.server.bind).await?;
    info!("synmodd listening on {}", cfg.server.bind);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("Client connected: {}", addr);
        let driver = Arc::clone(&driver);

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, driver).await {
                error!("Client handler error: {}", e);
            }
        });
    }
}
