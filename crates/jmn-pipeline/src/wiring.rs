//! Assembles collaborators from config: Postgres when `DATABASE_URL` is set, otherwise
//! in-memory stores seeded from JSON files.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use jmn_storage::postgres::connect;
use jmn_storage::{
    InMemoryMatchStore, InMemoryNotificationStore, InMemorySearchProfileStore,
    InMemorySubscriptionStore, PgMatchStore, PgNotificationStore, PgSearchProfileStore,
    PgSubscriptionStore, RealtimeChannel, WebhookPush,
};
use tracing::info;

use crate::config::PipelineConfig;
use crate::consumer::Collaborators;

#[derive(Debug, Clone, Default)]
pub struct SeedFiles {
    pub profiles: Option<PathBuf>,
    pub subscriptions: Option<PathBuf>,
}

/// Real-time channel for this process: the configured webhook, or `local` otherwise.
pub fn realtime_channel(
    config: &PipelineConfig,
    local: Arc<dyn RealtimeChannel>,
) -> Result<Arc<dyn RealtimeChannel>> {
    match &config.push_webhook_url {
        Some(url) => {
            info!(%url, "pushing notifications through webhook");
            Ok(Arc::new(WebhookPush::new(url.clone(), config.push_timeout)?))
        }
        None => Ok(local),
    }
}

pub async fn build_collaborators(
    config: &PipelineConfig,
    seeds: &SeedFiles,
    realtime: Arc<dyn RealtimeChannel>,
) -> Result<Collaborators> {
    if let Some(url) = &config.database_url {
        let pool = connect(url, config.store_timeout)
            .await
            .context("connecting to postgres")?;
        info!("using postgres-backed stores");
        return Ok(Collaborators {
            profiles: Arc::new(PgSearchProfileStore::new(pool.clone())),
            subscriptions: Arc::new(PgSubscriptionStore::new(pool.clone())),
            matches: Arc::new(PgMatchStore::new(pool.clone())),
            notifications: Arc::new(PgNotificationStore::new(pool)),
            realtime,
        });
    }

    let profiles = match &seeds.profiles {
        Some(path) => InMemorySearchProfileStore::from_json_file(path).await?,
        None => InMemorySearchProfileStore::default(),
    };
    let subscriptions = match &seeds.subscriptions {
        Some(path) => InMemorySubscriptionStore::from_json_file(path).await?,
        None => InMemorySubscriptionStore::default(),
    };
    info!("using in-memory stores");
    Ok(Collaborators {
        profiles: Arc::new(profiles),
        subscriptions: Arc::new(subscriptions),
        matches: Arc::new(InMemoryMatchStore::new()),
        notifications: Arc::new(InMemoryNotificationStore::new()),
        realtime,
    })
}
