use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::AppState;
use crate::error::ChatError;
use crate::identity::ConnectionContext;

/// 会话 cookie 名称
pub const SESSION_COOKIE: &str = "sid";

pub fn connection_context(headers: &HeaderMap, jar: &CookieJar) -> ConnectionContext {
    let bearer_token = headers
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    ConnectionContext {
        bearer_token,
        session_id: jar.get(SESSION_COOKIE).map(|c| c.value().to_string()),
    }
}

/// 解析身份并放入请求扩展，解析失败返回 401
pub async fn auth_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ChatError> {
    let ctx = connection_context(request.headers(), &jar);
    let identity = state
        .identity
        .resolve(&ctx)
        .await?
        .ok_or(ChatError::Unauthorized)?;

    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
