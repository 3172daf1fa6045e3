mod error;
mod middleware;
mod observability;
mod routes;
mod state;
mod validation;

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;
use voluntra_domain::mentions::MentionNotifier;
use voluntra_domain::triggers::{EventTriggers, TriggerDispatcher};
use voluntra_infra::{config::AppConfig, logging::init_tracing, runtime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config, "api")?;
    observability::init_metrics()?;

    let state = state::AppState::new(config.clone()).await?;

    // The in-memory change log lives in this process, so its triggers must run here.
    if config.embedded_triggers || config.uses_memory_store() {
        let media = runtime::build_media(&config)?;
        let dispatcher = TriggerDispatcher::new(
            EventTriggers::new(state.store.clone(), media),
            MentionNotifier::new(state.store.clone()),
        );
        let feed = state.store.clone();
        tokio::spawn(async move {
            dispatcher
                .run(feed, shutdown_signal(), observability::register_embedded_trigger)
                .await;
        });
        info!("embedded trigger dispatcher started");
    }

    let app = routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "starting api");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|err| {
        tracing::error!(error = %err, "server exited");
        err
    })?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests;
