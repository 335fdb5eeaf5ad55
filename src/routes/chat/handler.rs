use axum::{
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::AppState;
use crate::identity::Identity;
use crate::utils::{error_to_api_response, success_to_api_response};

/// 当前是否开放，以及下一次切换的时间（毫秒）和类型
pub async fn get_chat_state(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        success_to_api_response(state.retention.chat_state()),
    )
}

#[axum::debug_handler]
pub async fn get_history(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> impl IntoResponse {
    match state.router.history(&identity.user_id).await {
        Ok(messages) => (StatusCode::OK, success_to_api_response(messages)),
        Err(e) => {
            tracing::error!("Failed to get history for {}: {}", identity.user_id, e);
            (e.status(), error_to_api_response(e.code(), e.to_string()))
        }
    }
}
