//! Configuration module
//!
//! Loads configuration from environment variables.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;

use crate::rates::parse_rate_table;

/// Where ledger state lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" | "in-memory" => Ok(StorageBackend::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub storage_backend: StorageBackend,

    /// Database connection URL, required for the postgres backend
    pub database_url: Option<String>,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// HMAC secret for bearer tokens
    pub jwt_secret: String,

    /// Interest charged on loan collection, as a fraction (0.05 = 5%)
    pub loan_interest_rate: Decimal,

    pub min_credit_score: i32,

    pub otp_ttl_seconds: i64,
    pub otp_max_attempts: i32,

    /// Return challenge codes inline. Development only.
    pub otp_expose_code: bool,

    pub grant_ttl_seconds: i64,

    /// Units of domestic currency per unit of foreign currency
    pub exchange_rates: HashMap<String, Decimal>,

    pub admin_feed_max_limit: i64,
    pub request_timeout_secs: u64,
    pub authorization_retention_hours: i64,
    pub log_format: LogFormat,
}

impl Config {
    /// Development defaults with an in-memory store
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            storage_backend: StorageBackend::Memory,
            database_url: None,
            database_max_connections: 10,
            host: "127.0.0.1".to_string(),
            port: 3000,
            environment: "development".to_string(),
            jwt_secret: jwt_secret.into(),
            loan_interest_rate: Decimal::new(5, 2),
            min_credit_score: 450,
            otp_ttl_seconds: 300,
            otp_max_attempts: 5,
            otp_expose_code: false,
            grant_ttl_seconds: 300,
            exchange_rates: default_rates(),
            admin_feed_max_limit: 100,
            request_timeout_secs: 30,
            authorization_retention_hours: 24,
            log_format: LogFormat::Pretty,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ConfigError::MissingEnv("JWT_SECRET"))?;

        let mut config = Self::in_memory(jwt_secret);

        config.storage_backend = env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("STORAGE_BACKEND"))?;

        config.database_url = env::var("DATABASE_URL").ok();
        if config.storage_backend == StorageBackend::Postgres && config.database_url.is_none() {
            return Err(ConfigError::MissingEnv("DATABASE_URL"));
        }

        config.database_max_connections = parse_env("DATABASE_MAX_CONNECTIONS", 10)?;
        config.host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        config.port = parse_env("PORT", 3000)?;
        config.environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        config.loan_interest_rate = parse_env("LOAN_INTEREST_RATE", Decimal::new(5, 2))?;
        if config.loan_interest_rate.is_sign_negative() {
            return Err(ConfigError::InvalidValue("LOAN_INTEREST_RATE"));
        }

        config.min_credit_score = parse_env("MIN_CREDIT_SCORE", 450)?;
        config.otp_ttl_seconds =
            bounded("OTP_TTL_SECONDS", parse_env("OTP_TTL_SECONDS", 300)?, 1, MAX_TTL_SECONDS)?;
        config.otp_max_attempts = parse_env("OTP_MAX_ATTEMPTS", 5)?;
        if config.otp_max_attempts < 1 {
            return Err(ConfigError::InvalidValue("OTP_MAX_ATTEMPTS"));
        }
        config.otp_expose_code = parse_env("OTP_EXPOSE_CODE", false)?;
        config.grant_ttl_seconds =
            bounded("GRANT_TTL_SECONDS", parse_env("GRANT_TTL_SECONDS", 300)?, 1, MAX_TTL_SECONDS)?;

        if let Ok(table) = env::var("EXCHANGE_RATES") {
            config.exchange_rates =
                parse_rate_table(&table).map_err(|_| ConfigError::InvalidValue("EXCHANGE_RATES"))?;
        }

        config.admin_feed_max_limit = parse_env("ADMIN_FEED_MAX_LIMIT", 100)?;
        config.request_timeout_secs = parse_env("REQUEST_TIMEOUT_SECS", 30)?;
        config.authorization_retention_hours = bounded(
            "AUTHORIZATION_RETENTION_HOURS",
            parse_env("AUTHORIZATION_RETENTION_HOURS", 24)?,
            1,
            MAX_RETENTION_HOURS,
        )?;
        config.log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that are unsafe for the current environment
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_production() && self.otp_expose_code {
            return Err(ConfigError::Insecure("OTP_EXPOSE_CODE"));
        }
        Ok(())
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn otp_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.otp_ttl_seconds)
    }

    pub fn grant_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grant_ttl_seconds)
    }
}

/// One day
const MAX_TTL_SECONDS: i64 = 86_400;

/// One year
const MAX_RETENTION_HOURS: i64 = 8_760;

fn bounded(key: &'static str, value: i64, min: i64, max: i64) -> Result<i64, ConfigError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::InvalidValue(key))
    }
}

fn default_rates() -> HashMap<String, Decimal> {
    HashMap::from([
        ("USD".to_string(), Decimal::from(80)),
        ("EUR".to_string(), Decimal::from(88)),
        ("GBP".to_string(), Decimal::from(102)),
    ])
}

fn parse_env<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),

    #[error("{0} must not be enabled in production")]
    Insecure(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_in_memory_defaults() {
        let config = Config::in_memory("secret");

        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert_eq!(config.loan_interest_rate, dec!(0.05));
        assert_eq!(config.min_credit_score, 450);
        assert_eq!(config.exchange_rates.get("USD"), Some(&dec!(80)));
        assert!(!config.otp_expose_code);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_exposed_codes_rejected_in_production() {
        let mut config = Config::in_memory("secret");
        config.environment = "production".to_string();
        config.otp_expose_code = true;

        assert!(matches!(config.validate(), Err(ConfigError::Insecure("OTP_EXPOSE_CODE"))));
    }

    #[test]
    fn test_durations_are_range_checked() {
        assert_eq!(bounded("OTP_TTL_SECONDS", 300, 1, MAX_TTL_SECONDS).unwrap(), 300);
        assert!(matches!(
            bounded("OTP_TTL_SECONDS", 0, 1, MAX_TTL_SECONDS),
            Err(ConfigError::InvalidValue("OTP_TTL_SECONDS"))
        ));
        assert!(bounded("GRANT_TTL_SECONDS", -5, 1, MAX_TTL_SECONDS).is_err());
        assert!(bounded("GRANT_TTL_SECONDS", i64::MAX, 1, MAX_TTL_SECONDS).is_err());
        assert!(bounded("AUTHORIZATION_RETENTION_HOURS", 8_761, 1, MAX_RETENTION_HOURS).is_err());
        assert_eq!(bounded("AUTHORIZATION_RETENTION_HOURS", 24, 1, MAX_RETENTION_HOURS).unwrap(), 24);
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!("memory".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert_eq!("Postgres".parse::<StorageBackend>(), Ok(StorageBackend::Postgres));
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }
}
