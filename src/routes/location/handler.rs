use axum::{
    extract::{Extension, Json, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::model::{UpdateLocationRequest, UpdateLocationResponse};
use crate::AppState;
use crate::identity::Identity;
use crate::utils::{error_to_api_response, success_to_api_response};

#[axum::debug_handler]
pub async fn update_location(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<UpdateLocationRequest>,
) -> impl IntoResponse {
    match state
        .router
        .update_location(None, &identity, (&req).into())
        .await
    {
        Ok(nearby) => (
            StatusCode::OK,
            success_to_api_response(UpdateLocationResponse { nearby }),
        ),
        Err(e) => {
            tracing::warn!("Location update from {} failed: {}", identity.user_id, e);
            (e.status(), error_to_api_response(e.code(), e.to_string()))
        }
    }
}
