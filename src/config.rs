/// Configuration management for the rewards service
use crate::error::{RewardsError, RewardsResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Log filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "campus_rewards=debug,tower_http=debug";

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database: PathBuf,
    pub max_connections: u32,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret used to verify bearer tokens
    pub jwt_secret: String,
    /// Superuser created at startup when no account has that utorid
    pub bootstrap_superuser: Option<BootstrapAccount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapAccount {
    pub utorid: String,
    pub email: String,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Requests allowed per client IP per minute
    pub requests_per_minute: u32,
}

/// Ledger tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Attempts made when the storage layer reports a write conflict
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl LedgerConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff_ms: 20,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `campus_rewards=debug,tower_http=info`
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> RewardsResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("REWARDS_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("REWARDS_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| RewardsError::Validation("Invalid port number".to_string()))?;
        let version = env::var("REWARDS_VERSION")
            .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

        let database = env::var("REWARDS_DATABASE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/rewards.sqlite"));
        let max_connections = env::var("REWARDS_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .unwrap_or(10);

        let jwt_secret = env::var("REWARDS_JWT_SECRET")
            .map_err(|_| RewardsError::Validation("JWT secret required".to_string()))?;
        let bootstrap_superuser = match (
            env::var("REWARDS_SUPERUSER_UTORID"),
            env::var("REWARDS_SUPERUSER_EMAIL"),
        ) {
            (Ok(utorid), Ok(email)) => Some(BootstrapAccount { utorid, email }),
            _ => None,
        };

        let rate_limit_enabled = env::var("REWARDS_RATE_LIMIT_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse()
            .unwrap_or(true);
        let requests_per_minute = env::var("REWARDS_RATE_LIMIT_PER_MINUTE")
            .unwrap_or_else(|_| "600".to_string())
            .parse()
            .unwrap_or(600);

        let max_retries = env::var("REWARDS_LEDGER_MAX_RETRIES")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);
        let retry_backoff_ms = env::var("REWARDS_LEDGER_RETRY_BACKOFF_MS")
            .unwrap_or_else(|_| "20".to_string())
            .parse()
            .unwrap_or(20);

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version,
            },
            storage: StorageConfig {
                database,
                max_connections,
            },
            authentication: AuthConfig {
                jwt_secret,
                bootstrap_superuser,
            },
            rate_limit: RateLimitConfig {
                enabled: rate_limit_enabled,
                requests_per_minute,
            },
            ledger: LedgerConfig {
                max_retries,
                retry_backoff_ms,
            },
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Defaults for everything but the database path and token secret
    pub fn with_database(database: impl Into<PathBuf>, jwt_secret: impl Into<String>) -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 3000,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            storage: StorageConfig {
                database: database.into(),
                max_connections: 10,
            },
            authentication: AuthConfig {
                jwt_secret: jwt_secret.into(),
                bootstrap_superuser: None,
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                requests_per_minute: 600,
            },
            ledger: LedgerConfig::default(),
            logging: LoggingConfig {
                level: DEFAULT_LOG_FILTER.to_string(),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> RewardsResult<()> {
        if self.service.hostname.is_empty() {
            return Err(RewardsError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(RewardsError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.storage.max_connections == 0 {
            return Err(RewardsError::Validation(
                "Database pool needs at least one connection".to_string(),
            ));
        }

        if self.ledger.max_retries == 0 {
            return Err(RewardsError::Validation(
                "Ledger must make at least one attempt".to_string(),
            ));
        }

        if self.rate_limit.enabled && self.rate_limit.requests_per_minute == 0 {
            return Err(RewardsError::Validation(
                "Rate limit must allow at least one request per minute".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ServerConfig {
        ServerConfig::with_database(":memory:", "test-secret-key-for-testing-only-0123")
    }

    #[test]
    fn test_validate_rejects_short_secret() {
        let mut config = test_config();
        assert!(config.validate().is_ok());

        config.authentication.jwt_secret = "short".to_string();
        assert!(matches!(config.validate(), Err(RewardsError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let mut config = test_config();
        config.ledger.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_log_filter_parses() {
        let config = test_config();
        assert!(tracing_subscriber::EnvFilter::try_new(&config.logging.level).is_ok());
    }
}
