use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::utils::success_to_api_response;

#[derive(Serialize)]
pub struct PingResponse {
    pub status: String,
    /// 服务器时间
    pub timestamp: i64,
}

/// 健康检查接口
pub async fn ping() -> impl IntoResponse {
    (
        StatusCode::OK,
        success_to_api_response(PingResponse {
            status: "ok".to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        }),
    )
}
