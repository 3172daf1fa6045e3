use std::sync::Arc;

use voluntra_domain::events::EventService;
use voluntra_domain::moderation::ChatModerationService;
use voluntra_domain::participants::ParticipantService;
use voluntra_domain::ports::store::DocumentStore;
use voluntra_infra::config::AppConfig;
use voluntra_infra::runtime;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn DocumentStore>,
    pub events: EventService,
    pub participants: ParticipantService,
    pub moderation: ChatModerationService,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let store = runtime::build_store(&config).await?;
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: AppConfig, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            events: EventService::new(store.clone()),
            participants: ParticipantService::new(store.clone()),
            moderation: ChatModerationService::new(store.clone()),
            config,
            store,
        }
    }
}
