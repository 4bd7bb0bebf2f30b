//! Application bootstrap and dependency wiring.
//!
//! This module is the composition root: the single place where services
//! are instantiated and wired together.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{AppState, AppStateBuilder};
use crate::error::{NearcastError, NearcastResult};
use crate::runtime::{spawn_periodic, TokioSpawner};
use crate::services::{
    BroadcastJournal, BroadcastService, BroadcastStore, ConnectionRegistry, FanoutEngine,
    GeoIndex, InMemoryTrackCatalog, InMemoryUserDirectory, JsonFileJournal, MemoryJournal,
    TrackCatalog, UserDirectory,
};
use crate::state::Config;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Broadcast operations, consumed by the API layer.
    pub service: Arc<BroadcastService>,
    /// Authoritative broadcast state.
    pub store: Arc<BroadcastStore>,
    /// Positions of active broadcasters.
    pub geo: Arc<GeoIndex>,
    /// Live push channels.
    pub registry: Arc<ConnectionRegistry>,
    /// Validated configuration.
    pub config: Arc<Config>,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Builds the API state over these services.
    pub fn app_state(&self) -> NearcastResult<AppState> {
        AppStateBuilder::new()
            .service(Arc::clone(&self.service))
            .registry(Arc::clone(&self.registry))
            .config(Arc::clone(&self.config))
            .build()
    }

    /// Starts the periodic sweep of closed push channels.
    pub fn start_background_tasks(&self) {
        let registry = Arc::clone(&self.registry);
        spawn_periodic(
            &self.spawner,
            self.config.delivery.sweep_interval(),
            self.cancel_token.child_token(),
            move || {
                let removed = registry.sweep();
                if removed > 0 {
                    log::debug!("[Bootstrap] Swept {} closed connection(s)", removed);
                }
            },
        );
    }

    /// Stops background tasks and closes every live stream.
    pub fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();

        let closed = self.registry.close_all();
        log::info!("[Bootstrap] Closed {} connection(s)", closed);
        log::info!("[Bootstrap] Shutdown complete");
    }
}

fn open_journal(config: &Config) -> NearcastResult<Arc<dyn BroadcastJournal>> {
    match &config.data_dir {
        Some(dir) => {
            log::info!("[Bootstrap] Journaling broadcasts under {}", dir.display());
            Ok(Arc::new(JsonFileJournal::open(dir)?))
        }
        None => {
            log::info!("[Bootstrap] No data_dir configured, broadcasts are kept in memory");
            Ok(Arc::new(MemoryJournal::new()))
        }
    }
}

/// Bootstraps all application services with their dependencies.
///
/// Services are created in dependency order:
///
/// 1. Journal (file-backed when `data_dir` is set)
/// 2. Geo index and connection registry
/// 3. Broadcast store, restored from the journal
/// 4. Fan-out engine (geo index, registry)
/// 5. Broadcast service (store, fan-out, catalog, directory)
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// `Configuration` if the config is invalid or the journal cannot be
/// opened; `Internal` if restoring the journal fails.
pub fn bootstrap_services(config: &Config) -> NearcastResult<BootstrappedServices> {
    config.validate().map_err(NearcastError::Configuration)?;

    let spawner = TokioSpawner::current();
    let cancel_token = CancellationToken::new();

    let journal = open_journal(config)?;
    let geo = Arc::new(GeoIndex::new());
    let registry = Arc::new(ConnectionRegistry::new());

    let store = Arc::new(BroadcastStore::new(
        journal,
        Arc::clone(&geo),
        config.radius_policy.clone(),
        config.inactive_like_policy,
    ));
    store.restore()?;

    let fanout = Arc::new(FanoutEngine::new(
        Arc::clone(&geo),
        Arc::clone(&registry),
        config.delivery.send_timeout(),
    ));

    let catalog: Arc<dyn TrackCatalog> = Arc::new(InMemoryTrackCatalog::new());
    let users = InMemoryUserDirectory::new();
    for (user_id, nickname) in &config.nicknames {
        users.set_nickname(*user_id, nickname.clone());
    }
    let directory: Arc<dyn UserDirectory> = Arc::new(users);

    let service = Arc::new(BroadcastService::new(
        Arc::clone(&store),
        Arc::clone(&geo),
        fanout,
        catalog,
        directory,
        spawner.clone(),
    ));

    Ok(BootstrappedServices {
        service,
        store,
        geo,
        registry,
        config: Arc::new(config.clone()),
        spawner,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SsePushChannel;
    use crate::state::{DeliveryConfig, RadiusPolicy};
    use crate::types::{GeoPoint, TrackDescriptor};
    use std::time::Duration;

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let config = Config {
            delivery: DeliveryConfig {
                channel_capacity: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = bootstrap_services(&config).err().unwrap();
        assert!(matches!(err, NearcastError::Configuration(_)));

        let config = Config {
            radius_policy: serde_json::from_value::<RadiusPolicy>(serde_json::json!([
                { "minLikes": 5, "radiusMeter": 100 }
            ]))
            .unwrap(),
            ..Default::default()
        };
        assert!(bootstrap_services(&config).is_err());
    }

    #[tokio::test]
    async fn file_journal_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let first = bootstrap_services(&config).unwrap();
        let started = first
            .service
            .turn_on(1, GeoPoint::new(10.0, 10.0).unwrap(), &TrackDescriptor::with_id(5))
            .await
            .unwrap();
        first.service.like(started.broadcast_id, 2).await.unwrap();

        let second = bootstrap_services(&config).unwrap();
        let restored = second.store.snapshot(1).await.unwrap();
        assert_eq!(restored.record.broadcast_id, started.broadcast_id);
        assert_eq!(restored.record.like_count, 1);
        assert!(restored.record.active);
        assert_eq!(second.store.resolve(started.broadcast_id), Some(1));
    }

    #[tokio::test]
    async fn configured_nicknames_decorate_nearby() {
        let config = Config {
            nicknames: [(2, "near".to_string())].into_iter().collect(),
            ..Default::default()
        };
        let services = bootstrap_services(&config).unwrap();
        let here = GeoPoint::new(37.5, 127.0).unwrap();
        services
            .service
            .turn_on(1, here, &TrackDescriptor::with_id(5))
            .await
            .unwrap();
        services
            .service
            .turn_on(2, here, &TrackDescriptor::with_id(6))
            .await
            .unwrap();
        services
            .service
            .turn_on(3, here, &TrackDescriptor::with_id(7))
            .await
            .unwrap();

        let nearby = services.service.nearby(1).await.unwrap();
        let nickname_of = |user| {
            nearby
                .iter()
                .find(|b| b.user_id == user)
                .and_then(|b| b.nickname.clone())
        };
        assert_eq!(nearby.len(), 2);
        assert_eq!(nickname_of(2).as_deref(), Some("near"));
        assert_eq!(nickname_of(3), None);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_drops_closed_channels() {
        let config = Config {
            delivery: DeliveryConfig {
                sweep_interval_secs: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        let services = bootstrap_services(&config).unwrap();
        services.start_background_tasks();

        let (channel, rx) = SsePushChannel::new(4, services.registry.child_token());
        services.registry.register(9, Arc::new(channel));
        drop(rx);
        assert_eq!(services.registry.size(), 1);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(services.registry.size(), 0);
        services.shutdown();
    }

    #[tokio::test]
    async fn shutdown_closes_live_connections() {
        let services = bootstrap_services(&Config::default()).unwrap();
        let (channel, _rx) = SsePushChannel::new(4, services.registry.child_token());
        let cancel = channel.cancel_token().clone();
        services.registry.register(3, Arc::new(channel));

        services.shutdown();
        assert!(cancel.is_cancelled());
        assert_eq!(services.registry.size(), 0);
        assert!(services.cancel_token.is_cancelled());
    }
}
