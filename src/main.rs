use archive_transfer::config::TransferConfig;
use archive_transfer::infrastructure::{database, storage};
use archive_transfer::models::{NewTransfer, TransferRequest};
use archive_transfer::services::source::HttpSourceReader;
use archive_transfer::services::transfer_engine::TransferEngine;
use archive_transfer::services::transfer_store::{SeaOrmTransferStore, TransferStore};
use archive_transfer::services::worker::BackgroundWorker;
use archive_transfer::{AppState, create_app};
use clap::{Parser, ValueEnum};
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// HTTP API plus the purge worker
    Serve,
    /// Run a single transfer to completion and exit
    Run,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, value_enum, default_value_t = Mode::Serve)]
    mode: Mode,

    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Transfer to run (run mode)
    #[arg(long, required_if_eq("mode", "run"))]
    transfer_id: Option<String>,

    /// Registers the transfer first when no record exists (run mode)
    #[arg(long, requires = "bucket")]
    source_url: Option<String>,

    #[arg(long)]
    bucket: Option<String>,

    #[arg(long)]
    key_prefix: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "archive_transfer=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Archive Transfer [Mode: {:?}]...", args.mode);

    let config = TransferConfig::from_env();
    info!(
        "⚙️  Transfer Config: Part Size={}MB, Concurrency={}, Attempts={}, HTTPS only={}",
        config.part_size / 1024 / 1024,
        config.part_concurrency,
        config.part_max_attempts,
        config.require_https
    );

    let db = database::setup_database().await?;
    let storage_service = storage::setup_storage().await;
    let store: Arc<dyn TransferStore> =
        Arc::new(SeaOrmTransferStore::new(db.clone(), config.record_ttl_hours));
    let source = Arc::new(HttpSourceReader::new(&config)?);

    match args.mode {
        Mode::Run => {
            let transfer_id = args
                .transfer_id
                .ok_or_else(|| anyhow::anyhow!("--transfer-id is required in run mode"))?;

            let existing = store.get(&transfer_id).await?;
            let record = match (existing, args.source_url, args.bucket) {
                (Some(record), _, _) => Some(record),
                (None, Some(source_url), Some(bucket)) => Some(
                    store
                        .create(NewTransfer {
                            transfer_id: transfer_id.clone(),
                            source_url,
                            bucket,
                            key_prefix: args.key_prefix,
                        })
                        .await?,
                ),
                _ => None,
            };
            // A missing record is reported by the engine as a classified failure.
            let request = match &record {
                Some(record) => TransferRequest::from(record),
                None => TransferRequest {
                    transfer_id,
                    source_url: String::new(),
                    bucket: String::new(),
                    key_prefix: None,
                },
            };

            let engine = TransferEngine::new(source, storage_service, store, config);
            let observer = Arc::new(|bytes: u64, total: u64| {
                tracing::debug!(bytes, total, "progress");
            });
            let result = engine.transfer(request, observer).await;

            println!("{}", serde_json::to_string(&result)?);

            Ok(if result.success {
                ExitCode::SUCCESS
            } else if result.is_retryable() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            })
        }
        Mode::Serve => {
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

            let worker = BackgroundWorker::new(store.clone(), config.purge_interval, shutdown_rx);
            let worker_handle = tokio::spawn(worker.run());

            let state = AppState {
                db,
                store,
                source,
                storage: storage_service,
                config,
            };

            let app = create_app(state).layer(
                TraceLayer::new_for_http()
                    .make_span_with(|request: &axum::http::Request<_>| {
                        tracing::info_span!(
                            "http_request",
                            method = %request.method(),
                            uri = %request.uri(),
                        )
                    })
                    .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                        info!("📥 {} {}", request.method(), request.uri());
                    })
                    .on_response(
                        |response: &axum::http::Response<_>,
                         latency: std::time::Duration,
                         _span: &tracing::Span| {
                            info!(
                                "📤 Finished in {:?} with status {}",
                                latency,
                                response.status()
                            );
                        },
                    ),
            );

            let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
            info!("✅ Server ready at http://{}", addr);
            info!("📖 Swagger UI: http://{}/swagger-ui", addr);

            let listener = tokio::net::TcpListener::bind(addr).await?;

            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                    let _ = shutdown_tx.send(true);
                })
                .await?;

            let _ = worker_handle.await;
            info!("🛑 Server shut down gracefully.");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
