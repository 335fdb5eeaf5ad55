use async_trait::async_trait;

use super::{ConnectionContext, Identity, IdentityProvider};
use crate::error::ChatResult;
use crate::utils::verify_token;

pub struct JwtIdentityProvider {
    secret: String,
}

impl JwtIdentityProvider {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn resolve(&self, ctx: &ConnectionContext) -> ChatResult<Option<Identity>> {
        let Some(token) = ctx.bearer_token.as_deref() else {
            return Ok(None);
        };

        match verify_token(token, &self.secret) {
            Ok(claims) => {
                let nickname = claims.nickname.unwrap_or_else(|| claims.sub.clone());
                Ok(Some(Identity {
                    user_id: claims.sub,
                    nickname,
                }))
            }
            Err(e) => {
                tracing::debug!("Rejected bearer token: {}", e);
                Ok(None)
            }
        }
    }
}
