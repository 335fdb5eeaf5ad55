//! 存储层接口
//!
//! 位置存储和消息存储都是外部依赖，核心逻辑只通过这里的 trait 访问它们。
//! 生产环境使用 Postgres 实现，测试使用内存实现。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::MapLocation;
use crate::error::ChatResult;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryLocationStore, MemoryMessageStore};
pub use postgres::{PgLocationStore, PgMessageStore};

/// 用户最后一次上报的位置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserLocation {
    pub user_id: String,
    pub nickname: String,
    pub location: Option<MapLocation>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyUser {
    pub user_id: String,
    pub nickname: String,
    pub location: MapLocation,
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub message_id: String,
    pub user_id: String,
    pub nickname: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: String,
    pub nickname: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    /// 半径内（含边界）所有已上报位置的用户，按距离升序
    async fn near(&self, center: MapLocation, radius: f64) -> ChatResult<Vec<NearbyUser>>;

    async fn upsert_location(
        &self,
        user_id: &str,
        nickname: &str,
        location: MapLocation,
    ) -> ChatResult<()>;

    async fn find_user(&self, user_id: &str) -> ChatResult<Option<UserLocation>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, message: NewMessage) -> ChatResult<ChatMessage>;

    /// 删除全部消息，返回删除数量
    async fn delete_all(&self) -> ChatResult<u64>;

    /// 按创建时间升序
    async fn find_by_sender_in(&self, user_ids: &[String]) -> ChatResult<Vec<ChatMessage>>;
}

pub(crate) fn sort_by_distance(users: &mut [NearbyUser]) {
    users.sort_by(|a, b| a.distance.total_cmp(&b.distance));
}
