mod observability;
mod scheduler;

use std::net::SocketAddr;

use tracing::info;
use voluntra_domain::jobs::now_ms;
use voluntra_domain::mentions::MentionNotifier;
use voluntra_domain::triggers::{EventTriggers, TriggerDispatcher};
use voluntra_infra::{config::AppConfig, logging::init_tracing, runtime};

use crate::scheduler::{RetentionScheduler, SchedulerSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config, "worker")?;
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.worker_metrics_port));
    observability::init_metrics(metrics_addr)?;

    let store = runtime::build_store(&config).await?;
    let media = runtime::build_media(&config)?;
    let queue = runtime::build_job_queue(&config).await?;

    let dispatcher = TriggerDispatcher::new(
        EventTriggers::new(store.clone(), media),
        MentionNotifier::new(store.clone()),
    );
    let (stop_triggers, triggers_stopped) = tokio::sync::oneshot::channel::<()>();
    let feed = store.clone();
    let triggers = tokio::spawn(async move {
        let shutdown = async {
            let _ = triggers_stopped.await;
        };
        dispatcher
            .run(feed, shutdown, observability::register_dispatch)
            .await;
    });

    let scheduler =
        RetentionScheduler::new(queue, store, SchedulerSettings::from_config(&config));
    scheduler.recover().await?;
    scheduler.schedule(scheduler.slot_start_ms(now_ms())).await?;

    info!(metrics = %metrics_addr, "worker started");
    scheduler
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    let _ = stop_triggers.send(());
    if let Err(err) = triggers.await {
        tracing::warn!(error = %err, "trigger dispatcher task ended abnormally");
    }
    info!("worker shutdown");
    Ok(())
}
