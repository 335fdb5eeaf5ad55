//! 内存存储，用于测试和本地开发，不做持久化

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ChatMessage, LocationStore, MessageStore, NearbyUser, NewMessage, UserLocation,
    sort_by_distance,
};
use crate::common::MapLocation;
use crate::error::{ChatError, ChatResult};

#[derive(Default)]
pub struct MemoryLocationStore {
    users: DashMap<String, UserLocation>,
    unavailable: AtomicBool,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个尚未上报位置的用户
    pub fn insert_user(&self, user_id: &str, nickname: &str) {
        self.users.insert(
            user_id.to_string(),
            UserLocation {
                user_id: user_id.to_string(),
                nickname: nickname.to_string(),
                location: None,
                updated_at: None,
            },
        );
    }

    /// 模拟数据库不可用
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> ChatResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChatError::StoreUnavailable("location store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    async fn near(&self, center: MapLocation, radius: f64) -> ChatResult<Vec<NearbyUser>> {
        self.check()?;
        let mut nearby: Vec<NearbyUser> = self
            .users
            .iter()
            .filter_map(|entry| {
                let user = entry.value();
                let location = user.location?;
                let distance = center.distance_to(&location);
                (distance <= radius).then(|| NearbyUser {
                    user_id: user.user_id.clone(),
                    nickname: user.nickname.clone(),
                    location,
                    distance,
                })
            })
            .collect();
        sort_by_distance(&mut nearby);
        Ok(nearby)
    }

    async fn upsert_location(
        &self,
        user_id: &str,
        nickname: &str,
        location: MapLocation,
    ) -> ChatResult<()> {
        self.check()?;
        self.users.insert(
            user_id.to_string(),
            UserLocation {
                user_id: user_id.to_string(),
                nickname: nickname.to_string(),
                location: Some(location),
                updated_at: Some(Utc::now()),
            },
        );
        Ok(())
    }

    async fn find_user(&self, user_id: &str) -> ChatResult<Option<UserLocation>> {
        self.check()?;
        Ok(self.users.get(user_id).map(|u| u.value().clone()))
    }
}

#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<ChatMessage>>,
    unavailable: AtomicBool,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    fn check(&self) -> ChatResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChatError::StoreUnavailable("message store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, message: NewMessage) -> ChatResult<ChatMessage> {
        self.check()?;
        let stored = ChatMessage {
            message_id: Uuid::new_v4().to_string(),
            user_id: message.user_id,
            nickname: message.nickname,
            content: message.content,
            created_at: message.created_at,
        };
        self.messages.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn delete_all(&self) -> ChatResult<u64> {
        self.check()?;
        let mut messages = self.messages.write().await;
        let count = messages.len() as u64;
        messages.clear();
        Ok(count)
    }

    async fn find_by_sender_in(&self, user_ids: &[String]) -> ChatResult<Vec<ChatMessage>> {
        self.check()?;
        let mut found: Vec<ChatMessage> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| user_ids.contains(&m.user_id))
            .cloned()
            .collect();
        found.sort_by_key(|m| m.created_at);
        Ok(found)
    }
}
