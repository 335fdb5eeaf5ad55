use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;

use crate::AppState;
use crate::middleware::{auth_middleware, log_errors};
use crate::routes;

// 无需认证的路由
fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/ping", get(routes::health::ping))
        // WebSocket 自己解析身份，失败时在连接上回复 rejected
        .route("/ws", get(routes::ws::ws_handler))
}

// 需要认证的路由
fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/location/update", post(routes::location::update_location))
        .route("/chat/state", get(routes::chat::get_chat_state))
        .route("/chat/messages", get(routes::chat::get_history))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
}

// 创建主路由
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(public_routes())
        .merge(protected_routes(&state));

    // axum 不允许在根路径 nest
    let base = state.config.api_base_uri.trim_end_matches('/');
    let router = if base.is_empty() {
        api
    } else {
        Router::new().nest(base, api)
    };

    router
        .layer(ServiceBuilder::new().layer(axum::middleware::from_fn(log_errors)))
        .with_state(state)
}
