use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient};
use serde::{Deserialize, Serialize};

use super::{ConnectionContext, Identity, IdentityProvider};
use crate::error::ChatResult;

/// 会话缓存数据模型，由登录服务写入 `session:{session_id}`
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CachedSession {
    pub session_id: String,
    pub user_id: String,
    pub nickname: String,
    pub created_at: i64, // Unix timestamp
}

pub fn session_key(session_id: &str) -> String {
    format!("session:{}", session_id)
}

/// 基于 Redis 的会话解析，每次命中都会刷新过期时间
pub struct RedisSessionProvider {
    redis: Arc<RedisClient>,
    ttl: Duration,
}

impl RedisSessionProvider {
    pub fn new(redis: Arc<RedisClient>, ttl: Duration) -> Self {
        Self { redis, ttl }
    }
}

#[async_trait]
impl IdentityProvider for RedisSessionProvider {
    async fn resolve(&self, ctx: &ConnectionContext) -> ChatResult<Option<Identity>> {
        let Some(session_id) = ctx.session_id.as_deref() else {
            return Ok(None);
        };

        let mut conn = self.redis.get_multiplexed_async_connection().await?;
        let key = session_key(session_id);
        let raw: Option<String> = conn.get(&key).await?;

        let Some(json) = raw else {
            return Ok(None);
        };

        let session: CachedSession = match serde_json::from_str(&json) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Corrupt session record {}: {}", key, e);
                return Ok(None);
            }
        };

        // 滑动过期
        let _: () = conn.expire(&key, self.ttl.as_secs() as i64).await?;

        Ok(Some(Identity {
            user_id: session.user_id,
            nickname: session.nickname,
        }))
    }
}
