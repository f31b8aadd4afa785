use std::sync::Arc;

use anchor_tangle::{TangleBackend, TangleClient, TangleStub};
use ared_anchord::consumer::EventConsumer;
use ared_anchord::http::AppState;
use ared_anchord::reconcile::Reconciliation;
use ared_anchord::scheduler;
use ared_anchord::store::AnchorRepository;
use ared_anchord::workflow::{AnchorWorkflow, ClaimSet};
use ared_anchord::Settings;
use sqlx::sqlite::SqlitePoolOptions;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pick the real tangle client, or the stub when `ANCHORD_USE_STUB` asks
/// for an offline development setup.
fn create_backend(settings: &Settings) -> Arc<dyn TangleBackend> {
    let use_stub = std::env::var("ANCHORD_USE_STUB")
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(false);

    if use_stub {
        tracing::info!("using tangle stub backend");
        return Arc::new(TangleStub);
    }

    match TangleClient::new(settings.tangle.clone()) {
        Ok(client) => {
            tracing::info!(
                node_url = %settings.tangle.node_url,
                network = %settings.tangle.network,
                tag = %settings.tangle.tag(),
                "using tangle node backend"
            );
            Arc::new(client)
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to create tangle client");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env();

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(conn).await?;
                Ok(())
            })
        })
        .connect(&settings.database_url)
        .await?;

    let store = AnchorRepository::new(pool.clone());
    store.ensure_schema().await?;

    let backend = create_backend(&settings);
    let consumer = EventConsumer::new(pool.clone());
    let claims = ClaimSet::new();

    let workflow = Arc::new(AnchorWorkflow::new(
        store.clone(),
        consumer.clone(),
        backend.clone(),
        claims.clone(),
    ));
    let reconciliation = Arc::new(Reconciliation::new(
        store.clone(),
        backend.clone(),
        claims,
        settings.reconcile.clone(),
    ));

    if settings.scheduler.enabled {
        let daily_workflow = workflow.clone();
        let scheduler_config = settings.scheduler.clone();
        tokio::spawn(async move {
            scheduler::run_daily_anchor_loop(daily_workflow, scheduler_config).await;
        });
    } else {
        tracing::info!("daily anchor scheduler disabled");
    }

    let reconcile_interval = settings.reconciliation_interval;
    tokio::spawn(async move {
        scheduler::run_reconciliation_loop(reconciliation, reconcile_interval).await;
    });

    let state = AppState {
        store,
        workflow,
        backend,
        tangle_enabled: settings.tangle.enabled,
        network: settings.tangle.network.clone(),
    };
    let app = ared_anchord::build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(addr = %settings.bind_addr, "anchor service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
