mod auth;
mod error_handler;

pub use auth::{SESSION_COOKIE, auth_middleware, connection_context};
pub use error_handler::log_errors;
