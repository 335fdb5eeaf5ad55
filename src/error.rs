use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::utils::{error_codes, error_to_api_response};

#[derive(Debug, Error)]
pub enum ChatError {
    /// 没有可解析的身份
    #[error("unauthorized")]
    Unauthorized,
    /// 数据存储不可用，调用方负责重试
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ChatError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ChatError::InvalidInput(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Unauthorized => StatusCode::UNAUTHORIZED,
            ChatError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ChatError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            ChatError::Unauthorized => error_codes::AUTH_FAILED,
            ChatError::StoreUnavailable(_) => error_codes::STORE_UNAVAILABLE,
            ChatError::InvalidInput(_) => error_codes::VALIDATION_ERROR,
        }
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(e: sqlx::Error) -> Self {
        ChatError::StoreUnavailable(e.to_string())
    }
}

impl From<redis::RedisError> for ChatError {
    fn from(e: redis::RedisError) -> Self {
        ChatError::StoreUnavailable(e.to_string())
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = error_to_api_response::<()>(self.code(), self.to_string());
        (status, body).into_response()
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
