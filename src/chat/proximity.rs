use std::sync::Arc;

use crate::common::MapLocation;
use crate::error::ChatResult;
use crate::store::{LocationStore, NearbyUser};

/// 附近用户解析：只依赖位置存储，与在线状态无关
pub struct ProximityResolver {
    store: Arc<dyn LocationStore>,
    chat_radius: f64,
    history_radius: f64,
}

impl ProximityResolver {
    pub fn new(store: Arc<dyn LocationStore>, chat_radius: f64, history_radius: f64) -> Self {
        Self {
            store,
            chat_radius,
            history_radius,
        }
    }

    pub fn chat_radius(&self) -> f64 {
        self.chat_radius
    }

    pub fn history_radius(&self) -> f64 {
        self.history_radius
    }

    /// 包含原点用户自己，是否排除由调用方决定
    pub async fn find_nearby(
        &self,
        origin: MapLocation,
        radius: f64,
    ) -> ChatResult<Vec<NearbyUser>> {
        self.store.near(origin, radius).await.inspect_err(|e| {
            tracing::error!("Nearby query failed: {}", e);
        })
    }

    /// 必须在依赖新位置的查询之前完成
    pub async fn persist_location(
        &self,
        user_id: &str,
        nickname: &str,
        coords: MapLocation,
    ) -> ChatResult<()> {
        self.store
            .upsert_location(user_id, nickname, coords)
            .await
            .inspect_err(|e| tracing::error!("Failed to persist location of {}: {}", user_id, e))
    }

    pub async fn stored_location(&self, user_id: &str) -> ChatResult<Option<MapLocation>> {
        Ok(self
            .store
            .find_user(user_id)
            .await?
            .and_then(|user| user.location))
    }
}
