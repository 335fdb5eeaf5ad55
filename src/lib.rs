use std::sync::Arc;

use chat::{
    Clock, FanoutRouter, PresenceRegistry, ProximityResolver, RetentionHandle, RetentionScheduler,
};
use config::Config;
use identity::IdentityProvider;
use store::{LocationStore, MessageStore};

pub mod chat;
pub mod common;
pub mod config;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod router;
pub mod routes;
pub mod store;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub identity: Arc<dyn IdentityProvider>,
    pub presence: Arc<PresenceRegistry>,
    pub router: Arc<FanoutRouter>,
    pub retention: RetentionHandle,
}

impl AppState {
    /// 组装核心组件；返回的清理调度器需要调用方 spawn
    pub fn new(
        config: Config,
        identity: Arc<dyn IdentityProvider>,
        locations: Arc<dyn LocationStore>,
        messages: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
    ) -> (Self, RetentionScheduler) {
        let presence = Arc::new(PresenceRegistry::new());
        let proximity = ProximityResolver::new(
            locations,
            config.chat_radius_meters,
            config.history_radius_meters,
        );
        let router = Arc::new(FanoutRouter::new(
            presence.clone(),
            proximity,
            messages.clone(),
        ));
        let (scheduler, retention) = RetentionScheduler::new(
            config.open_windows.clone(),
            messages,
            clock,
            config.closed_purge_interval(),
        );

        let state = AppState {
            config,
            identity,
            presence,
            router,
            retention,
        };
        (state, scheduler)
    }
}
