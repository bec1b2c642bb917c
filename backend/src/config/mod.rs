//! # Configuration Module
//!
//! This module handles loading and validating configuration from
//! environment variables. All settings are centralized here.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = AppConfig::from_env()?;
//! println!("Pace factor: {}", config.pace_factor);
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SERVER_HOST` | HTTP server host | `127.0.0.1` |
//! | `SERVER_PORT` | HTTP server port | `8080` |
//! | `DATABASE_URL` | PostgreSQL connection string (enables persistence) | unset |
//! | `PACE_FACTOR` | Daily pacing front-load multiplier | `1.15` |
//! | `MIN_BID` | Platform minimum bid (minor units) | `50` |
//! | `MIN_BID_INCREMENT` | Remaining-budget floor for TOTAL campaigns | `1` |
//! | `ALERT_WARNING_RATIO` | Budget warning threshold | `0.80` |
//! | `ALERT_CRITICAL_RATIO` | Budget critical threshold | `0.95` |
//! | `TICK_INTERVAL` | Pacing/reset tick (seconds) | `60` |
//! | `PERSIST_INTERVAL` | Persistence flush (seconds) | `300` |
//! | `BILLING_MAX_RETRIES` | Declined charge retries before pausing | `3` |
//! | `BILLING_RETRY_BASE_SECS` | Retry backoff base (seconds) | `60` |
//! | `CATEGORY_TAXONOMY` | Comma-separated allowed categories | empty (any) |

use std::env;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An environment variable has an invalid value
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    /// Failed to parse a value
    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

/// Application configuration loaded from environment variables.
///
/// This struct contains all the settings needed to run the pacing
/// service. Values are loaded from environment variables at startup;
/// [`AppConfig::default`] gives the same values without touching the
/// environment, which is what tests use.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // ==========================================
    // SERVER SETTINGS
    // ==========================================

    /// HTTP server host address.
    ///
    /// Use `127.0.0.1` for localhost only, `0.0.0.0` to accept
    /// connections from any interface.
    pub server_host: String,

    /// HTTP server port number.
    pub server_port: u16,

    // ==========================================
    // DATABASE SETTINGS
    // ==========================================

    /// PostgreSQL connection URL.
    ///
    /// When unset the engine runs purely in memory and nothing
    /// survives a restart.
    pub database_url: Option<String>,

    // ==========================================
    // ENGINE SETTINGS
    // ==========================================

    /// Multiplier applied to the elapsed-day fraction when pacing
    /// DAILY budgets. `1.0` is a strict linear ramp; larger values
    /// allow modest front-loading.
    pub pace_factor: f64,

    /// Platform minimum bid in minor units. Used as the effective bid
    /// of campaigns that set no bid of their own.
    pub min_bid: i64,

    /// A TOTAL campaign stays eligible only while its remaining budget
    /// is strictly greater than this (minor units).
    pub min_bid_increment: i64,

    /// Usage ratio at which a WARNING alert is raised.
    pub alert_warning_ratio: f64,

    /// Usage ratio at which a CRITICAL alert is raised.
    pub alert_critical_ratio: f64,

    /// Allowed targeting categories. Empty means any category.
    pub category_taxonomy: Vec<String>,

    // ==========================================
    // SCHEDULING SETTINGS
    // ==========================================

    /// How often the pacing tick runs (in seconds).
    ///
    /// The tick rolls daily resets, expires schedules and
    /// resubmits due billing retries.
    pub tick_interval: u64,

    /// How often engine state is flushed to the database (in seconds).
    pub persist_interval: u64,

    // ==========================================
    // BILLING SETTINGS
    // ==========================================

    /// Declined-charge retries before the campaign is paused.
    pub billing_max_retries: u32,

    /// Backoff base in seconds; retry `n` waits `base * 2^(n-1)`.
    pub billing_retry_base_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            database_url: None,
            pace_factor: 1.15,
            min_bid: 50,
            min_bid_increment: 1,
            alert_warning_ratio: 0.80,
            alert_critical_ratio: 0.95,
            category_taxonomy: Vec::new(),
            tick_interval: 60,
            persist_interval: 300,
            billing_max_retries: 3,
            billing_retry_base_secs: 60,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Use `dotenvy::dotenv()` before calling this to load from `.env` file.
    ///
    /// ## Returns
    ///
    /// - `Ok(AppConfig)` - Configuration loaded successfully
    /// - `Err(ConfigError)` - A variable is malformed or out of range
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            // Server
            server_host: get_env_or_default("SERVER_HOST", "127.0.0.1"),
            server_port: parse_env("SERVER_PORT", "8080")?,

            // Database
            database_url: get_optional_env("DATABASE_URL"),

            // Engine
            pace_factor: parse_env("PACE_FACTOR", "1.15")?,
            min_bid: parse_env("MIN_BID", "50")?,
            min_bid_increment: parse_env("MIN_BID_INCREMENT", "1")?,
            alert_warning_ratio: parse_env("ALERT_WARNING_RATIO", "0.80")?,
            alert_critical_ratio: parse_env("ALERT_CRITICAL_RATIO", "0.95")?,
            category_taxonomy: parse_list(&get_env_or_default("CATEGORY_TAXONOMY", "")),

            // Scheduling
            tick_interval: parse_env("TICK_INTERVAL", "60")?,
            persist_interval: parse_env("PERSIST_INTERVAL", "300")?,

            // Billing
            billing_max_retries: parse_env("BILLING_MAX_RETRIES", "3")?,
            billing_retry_base_secs: parse_env("BILLING_RETRY_BASE_SECS", "60")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.pace_factor.is_finite() || self.pace_factor < 1.0 {
            return Err(ConfigError::InvalidValue(
                "PACE_FACTOR".to_string(),
                format!("must be >= 1.0, got {}", self.pace_factor),
            ));
        }

        if self.min_bid <= 0 {
            return Err(ConfigError::InvalidValue(
                "MIN_BID".to_string(),
                format!("must be > 0, got {}", self.min_bid),
            ));
        }

        if self.min_bid_increment < 0 {
            return Err(ConfigError::InvalidValue(
                "MIN_BID_INCREMENT".to_string(),
                format!("must be >= 0, got {}", self.min_bid_increment),
            ));
        }

        let in_range = |r: f64| r.is_finite() && r > 0.0 && r <= 1.0;
        if !in_range(self.alert_warning_ratio)
            || !in_range(self.alert_critical_ratio)
            || self.alert_warning_ratio >= self.alert_critical_ratio
        {
            return Err(ConfigError::InvalidValue(
                "ALERT_WARNING_RATIO/ALERT_CRITICAL_RATIO".to_string(),
                format!(
                    "need 0 < warning < critical <= 1, got {} / {}",
                    self.alert_warning_ratio, self.alert_critical_ratio
                ),
            ));
        }

        if self.tick_interval == 0 || self.persist_interval == 0 {
            return Err(ConfigError::InvalidValue(
                "TICK_INTERVAL/PERSIST_INTERVAL".to_string(),
                "intervals must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether `category` is allowed by the configured taxonomy.
    pub fn is_known_category(&self, category: &str) -> bool {
        self.category_taxonomy.is_empty()
            || self
                .category_taxonomy
                .iter()
                .any(|c| c.eq_ignore_ascii_case(category))
    }
}

/// Get an environment variable with a default value.
///
/// Returns the default if the variable is not set.
fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an environment variable, treating unset and blank the same.
fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an environment variable (or its default) into `T`.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::ParseError(key.to_string(), e.to_string()))
}

/// Split a comma-separated list, dropping blanks.
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
