// config.rs
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub port: u16,
    pub database_max_connections: u32,
    pub cors_origins: Vec<String>,
    pub session_cookie_secure: bool,
    pub log_level: LevelFilter,
    // Period of the winning-bid consistency audit
    pub audit_interval_secs: u64,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn init() -> Result<Config, ConfigError> {
        let database_url = required("DATABASE_URL")?;
        let jwt_secret = required("JWT_SECRET_KEY")?;

        let port = parsed("PORT", 8000u16)?;
        let database_max_connections = parsed("DATABASE_MAX_CONNECTIONS", 20u32)?;
        let session_cookie_secure = parsed("SESSION_COOKIE_SECURE", false)?;
        let log_level = parsed("LOG_LEVEL", LevelFilter::DEBUG)?;
        let audit_interval_secs = parsed("AUDIT_INTERVAL_SECS", 300u64)?;

        let cors_origins = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173,http://localhost:8000".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        Ok(Config {
            database_url,
            jwt_secret,
            port,
            database_max_connections,
            cors_origins,
            session_cookie_secure,
            log_level,
            audit_interval_secs,
        })
    }
}
