use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use crate::review::{ReviewPolicy, LEASE_TIMEOUT_HOURS, REQUIRED_REVIEWS};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub store: StoreConfig,
    pub review: ReviewConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let database_url = env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());
        let pool_size = positive("DATABASE_POOL_SIZE", 8)?;

        let required_reviews = positive("REVIEW_REQUIRED_REVIEWS", REQUIRED_REVIEWS)?;
        let lease_timeout_hours = positive("REVIEW_LEASE_TIMEOUT_HOURS", LEASE_TIMEOUT_HOURS as u32)?;
        let sweep_interval = optional_positive("REVIEW_SWEEP_INTERVAL_SECS")?
            .map(|secs| Duration::from_secs(u64::from(secs)));

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            store: StoreConfig {
                database_url,
                pool_size,
            },
            review: ReviewConfig {
                required_reviews,
                lease_timeout_hours,
                sweep_interval,
            },
        })
    }
}

fn optional_positive(var: &'static str) -> Result<Option<u32>, ConfigError> {
    let Ok(raw) = env::var(var) else {
        return Ok(None);
    };
    let value = raw
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: raw.clone(),
        })?;
    if value == 0 {
        return Err(ConfigError::MustBePositive { var });
    }
    Ok(Some(value))
}

fn positive(var: &'static str, default: u32) -> Result<u32, ConfigError> {
    Ok(optional_positive(var)?.unwrap_or(default))
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Where the review ledger lives. Without a database URL the in-memory ledger is used.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: Option<String>,
    pub pool_size: u32,
}

#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub required_reviews: u32,
    pub lease_timeout_hours: u32,
    /// When set, the server also reclaims leases on this period.
    pub sweep_interval: Option<Duration>,
}

impl ReviewConfig {
    pub fn policy(&self) -> ReviewPolicy {
        ReviewPolicy {
            required_reviews: self.required_reviews,
            lease_timeout: chrono::Duration::hours(i64::from(self.lease_timeout_hours)),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidNumber { var: &'static str, value: String },
    MustBePositive { var: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidNumber { var, value } => {
                write!(f, "{var} must be a whole number, got '{value}'")
            }
            ConfigError::MustBePositive { var } => write!(f, "{var} must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidNumber { .. }
            | ConfigError::MustBePositive { .. } => None,
        }
    }
}
