//! 身份解析
//!
//! 登录、注册由外部系统负责，这里只把连接上下文（Bearer token 或会话 cookie）
//! 解析成稳定的用户ID和昵称。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChatResult;

mod jwt;
mod session;

pub use jwt::JwtIdentityProvider;
pub use session::{CachedSession, RedisSessionProvider, session_key};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub nickname: String,
}

/// 连接上下文：HTTP 请求或 WebSocket 握手时携带的凭证
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    pub bearer_token: Option<String>,
    pub session_id: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// 凭证缺失或无效时返回 Ok(None)，只有后端故障才返回错误
    async fn resolve(&self, ctx: &ConnectionContext) -> ChatResult<Option<Identity>>;
}

/// 依次尝试多个身份来源，第一个解析成功的生效
pub struct ChainedIdentityProvider {
    providers: Vec<Arc<dyn IdentityProvider>>,
}

impl ChainedIdentityProvider {
    pub fn new(providers: Vec<Arc<dyn IdentityProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl IdentityProvider for ChainedIdentityProvider {
    async fn resolve(&self, ctx: &ConnectionContext) -> ChatResult<Option<Identity>> {
        for provider in &self.providers {
            if let Some(identity) = provider.resolve(ctx).await? {
                return Ok(Some(identity));
            }
        }
        Ok(None)
    }
}
