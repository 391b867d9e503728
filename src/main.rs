use std::{future::IntoFuture, process, sync::Arc, time::Duration};

use readtrail::{
    application::{
        analytics::{AnalyticsService, window_start},
        error::AppError,
        registry::SessionRegistry,
        repos::{AnalyticsRepo, TrackingStore},
        tracker::{SystemClock, TrackingConfig},
    },
    config::{self, StoreBackend, StoreSettings},
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{self, CollectorState},
        rest::RestRowStore,
        telemetry,
    },
};
use time::OffsetDateTime;
use tokio::{signal, sync::Notify, task::JoinHandle};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Report(args) => run_report(settings, args).await,
    }
}

struct Stores {
    tracking: Arc<dyn TrackingStore>,
    analytics: Arc<dyn AnalyticsRepo>,
}

async fn init_stores(settings: &StoreSettings, migrate: bool) -> Result<Stores, AppError> {
    match settings.backend {
        StoreBackend::Postgres => {
            let url = settings.database.url.as_deref().ok_or_else(|| {
                InfraError::configuration("`database.url` is required for the postgres backend")
            })?;
            let pool = PostgresRepositories::connect(url, settings.database.max_connections.get())
                .await
                .map_err(|err| InfraError::database(err.to_string()))?;
            if migrate {
                PostgresRepositories::run_migrations(&pool)
                    .await
                    .map_err(|err| InfraError::database(err.to_string()))?;
            }

            let repositories = Arc::new(PostgresRepositories::new(pool));
            info!(target = "readtrail::store", backend = "postgres", "tracking store ready");
            Ok(Stores {
                tracking: repositories.clone(),
                analytics: repositories,
            })
        }
        StoreBackend::Rest => {
            let base = settings.rest.base_url.as_ref().ok_or_else(|| {
                InfraError::configuration("`rest.url` is required for the rest backend")
            })?;
            let api_key = settings.rest.api_key.as_deref().ok_or_else(|| {
                InfraError::configuration("`rest.api_key` is required for the rest backend")
            })?;

            let store = Arc::new(RestRowStore::new(base, api_key, settings.rest.timeout)?);
            info!(
                target = "readtrail::store",
                backend = "rest",
                base_url = %base,
                "tracking store ready"
            );
            Ok(Stores {
                tracking: store.clone(),
                analytics: store,
            })
        }
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let stores = init_stores(&settings.store, true).await?;

    let tracking = TrackingConfig::from(&settings.tracking);
    if !tracking.writes_enabled() {
        warn!(
            target = "readtrail::tracker",
            environment = %tracking.environment,
            "tracking writes disabled; sessions stay in memory only"
        );
    }

    let idle_timeout = time::Duration::try_from(settings.registry.idle_timeout)
        .map_err(|err| AppError::unexpected(format!("invalid idle timeout: {err}")))?;
    let registry = Arc::new(SessionRegistry::new(
        stores.tracking.clone(),
        tracking,
        Arc::new(SystemClock),
        idle_timeout,
    ));
    let sweeper = spawn_idle_sweeper(registry.clone(), settings.registry.sweep_interval);

    let state = CollectorState {
        registry: registry.clone(),
        analytics: Arc::new(AnalyticsService::new(stores.analytics)),
        store: stores.tracking,
    };
    let result = serve_http(&settings, state).await;

    sweeper.abort();
    info!(
        target = "readtrail::registry",
        open_sessions = registry.len(),
        "collector stopped"
    );
    result
}

fn spawn_idle_sweeper(registry: Arc<SessionRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.tick().await; // Skip the first immediate tick
        loop {
            interval.tick().await;
            registry.sweep_idle();
        }
    })
}

async fn serve_http(settings: &config::Settings, state: CollectorState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "readtrail::http",
        addr = %settings.server.addr,
        "collector listening"
    );

    let stop = Arc::new(Notify::new());
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown({
            let stop = stop.clone();
            async move { stop.notified().await }
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        () = shutdown_signal() => {
            info!(target = "readtrail::http", "shutdown requested; draining connections");
            stop.notify_one();
            match tokio::time::timeout(settings.server.graceful_shutdown, &mut server).await {
                Ok(result) => {
                    result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
                }
                Err(_) => warn!(
                    target = "readtrail::http",
                    timeout_secs = settings.server.graceful_shutdown.as_secs(),
                    "graceful shutdown timed out"
                ),
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn run_report(settings: config::Settings, args: config::ReportArgs) -> Result<(), AppError> {
    let stores = init_stores(&settings.store, false).await?;
    let service = AnalyticsService::new(stores.analytics);

    let since = window_start(OffsetDateTime::now_utc(), args.since_hours);
    let summaries = service.page_summaries(since, args.limit).await?;

    let rendered = serde_json::to_string_pretty(&summaries)
        .map_err(|err| AppError::unexpected(format!("failed to encode report: {err}")))?;
    println!("{rendered}");
    Ok(())
}
