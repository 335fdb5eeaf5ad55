use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::chat::retention::{OpenWindows, WindowParseError};

const DEFAULT_OPEN_WINDOWS: &str = "6-9,11-15,17-23";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub server_host: String,
    pub server_port: u16,
    pub api_base_uri: String,
    pub db_max_connections: u32,
    /// 消息扇出半径（米）
    pub chat_radius_meters: f64,
    /// 历史消息查询半径（米）
    pub history_radius_meters: f64,
    pub open_windows: OpenWindows,
    pub closed_purge_interval_secs: u64,
    pub session_ttl_secs: u64,
}

impl Config {
    /// 除三个必填项外全部使用默认值
    pub fn new(database_url: &str, redis_url: &str, jwt_secret: &str) -> Self {
        Config {
            database_url: database_url.to_string(),
            redis_url: redis_url.to_string(),
            jwt_secret: jwt_secret.to_string(),
            server_host: "::".to_string(),
            server_port: 3000,
            api_base_uri: "/api".to_string(),
            db_max_connections: 10,
            chat_radius_meters: 3000.0,
            history_radius_meters: 500.0,
            open_windows: OpenWindows::from_str(DEFAULT_OPEN_WINDOWS)
                .unwrap_or_else(|_| OpenWindows::default()),
            closed_purge_interval_secs: 60,
            session_ttl_secs: 24 * 3600,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = Config::new(
            &required("DATABASE_URL")?,
            &required("REDIS_URL")?,
            &required("JWT_SECRET")?,
        );

        if let Ok(host) = env::var("SERVER_HOST") {
            config.server_host = host;
        }
        if let Ok(base) = env::var("API_BASE_URI") {
            config.api_base_uri = base;
        }
        config.server_port = parsed("SERVER_PORT", config.server_port)?;
        config.db_max_connections = parsed("DB_MAX_CONNECTIONS", config.db_max_connections)?;
        config.chat_radius_meters = radius("CHAT_RADIUS_METERS", config.chat_radius_meters)?;
        config.history_radius_meters =
            radius("HISTORY_RADIUS_METERS", config.history_radius_meters)?;
        config.closed_purge_interval_secs =
            parsed("CLOSED_PURGE_INTERVAL_SECS", config.closed_purge_interval_secs)?;
        if config.closed_purge_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "CLOSED_PURGE_INTERVAL_SECS",
                reason: "must be at least 1".into(),
            });
        }
        config.session_ttl_secs = parsed("SESSION_TTL_SECS", config.session_ttl_secs)?;

        if let Ok(raw) = env::var("CHAT_OPEN_WINDOWS") {
            config.open_windows = raw.parse().map_err(|e: WindowParseError| ConfigError::Invalid {
                name: "CHAT_OPEN_WINDOWS",
                reason: e.to_string(),
            })?;
        }

        Ok(config)
    }

    pub fn closed_purge_interval(&self) -> Duration {
        Duration::from_secs(self.closed_purge_interval_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parsed<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn radius(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let value: f64 = parsed(name, default)?;
    if !value.is_finite() || value <= 0.0 {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("radius must be a positive number of meters, got {}", value),
        });
    }
    Ok(value)
}
