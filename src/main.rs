use std::{process, sync::Arc, time::Duration};

use motorcache::{
    cache::{CacheConfig, CacheWarmer, ResponseCache},
    catalog::{Catalog, FileCatalog},
    config::{self, InvalidateArgs},
    error::AppError,
    infra::{
        error::InfraError,
        http::{self, ApiState},
        telemetry,
    },
    search::{BuildOutcome, SearchConfig, SearchIndex},
    store::{ConnectionManager, ConnectionProvider},
};
use tracing::{Dispatch, Level, debug, dispatcher, error, info, warn};
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
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Reindex(_) => run_reindex(settings).await,
        config::Command::Invalidate(args) => run_invalidate(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let store = ConnectionManager::from_settings(&settings.store);
    if let Err(err) = store.connect().await {
        warn!(error = %err, "store unavailable at startup; serving without cache");
    }
    store.start_health_checks();

    let provider: Arc<dyn ConnectionProvider> = store.clone();
    let catalog: Arc<dyn Catalog> = Arc::new(FileCatalog::new(&settings.catalog.path));
    let cache = ResponseCache::new(CacheConfig::from(&settings.cache), provider.clone());
    let search = SearchIndex::new(
        SearchConfig::from(&settings.search),
        provider,
        catalog.clone(),
    );

    if let Err(err) = search.build_index().await {
        warn!(error = %err, "initial search index build failed; searches fall back to the catalog");
    }
    search.start_refresh();

    if settings.cache.warm_on_startup && store.status().ready {
        if let Err(err) = CacheWarmer::new(cache.clone(), catalog.clone()).warm().await {
            debug!(error = %err, "starting with a cold response cache");
        }
    }

    let state = ApiState {
        catalog,
        cache,
        search: search.clone(),
        store: store.clone(),
    };
    let served = serve_http(&settings, state).await;

    search.shutdown().await;
    store.shutdown().await;
    served
}

async fn serve_http(settings: &config::Settings, state: ApiState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "listening");

    let grace = settings.server.graceful_shutdown;
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))
        }
        _ = drain_deadline(grace) => {
            warn!(grace_secs = grace.as_secs(), "graceful shutdown timed out");
            Ok(())
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received; draining connections");
}

/// Resolves `grace` after the shutdown signal, bounding how long in-flight requests
/// may keep the process alive.
async fn drain_deadline(grace: Duration) {
    shutdown_signal().await;
    tokio::time::sleep(grace).await;
}

async fn run_reindex(settings: config::Settings) -> Result<(), AppError> {
    let store = ConnectionManager::from_settings(&settings.store);
    let role = store.connect().await.map_err(InfraError::from)?;
    info!(role = %role, "store connected");

    let catalog: Arc<dyn Catalog> = Arc::new(FileCatalog::new(&settings.catalog.path));
    let search = SearchIndex::new(SearchConfig::from(&settings.search), store.clone(), catalog);
    let outcome = search.invalidate().await;
    store.shutdown().await;

    match outcome? {
        BuildOutcome::Built {
            documents,
            terms,
            mirrored,
        } => {
            info!(documents, terms, mirrored, "search index rebuilt");
            if !mirrored {
                return Err(AppError::from(InfraError::store(
                    "index built but the mirror write failed",
                )));
            }
            Ok(())
        }
        BuildOutcome::Skipped => Ok(()),
    }
}

async fn run_invalidate(settings: config::Settings, args: InvalidateArgs) -> Result<(), AppError> {
    let store = ConnectionManager::from_settings(&settings.store);
    store.connect().await.map_err(InfraError::from)?;

    let cache = ResponseCache::new(CacheConfig::from(&settings.cache), store.clone());
    let outcome = cache.invalidate(&args.namespace).await;
    store.shutdown().await;

    let deleted = outcome?;
    info!(namespace = %args.namespace, deleted, "cache namespace invalidated");
    Ok(())
}
