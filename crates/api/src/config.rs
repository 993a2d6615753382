//! Application configuration loaded from environment variables.

use std::time::Duration;

use domain::BusinessHours;
use saga::PaymentSettings;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `DATABASE_URL`: Postgres journal; unset keeps the journal in memory
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `PAYMENT_TIMEOUT_MS`: bound on one gateway capture (default: `10000`)
/// - `CURRENCY`: currency charged for purchases (default: `"USD"`)
/// - `BUSINESS_OPEN_HOUR` / `BUSINESS_CLOSE_HOUR`: consulting hours (default: 9 / 17)
/// - `NOTIFICATION_SWEEP_SECS`: follow-up email sweep period (default: `60`)
/// - `COMPENSATION_RETRY_SECS`: retry period for stuck compensations (default: `30`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub payment_timeout: Duration,
    pub currency: String,
    pub open_hour: u32,
    pub close_hour: u32,
    pub notification_sweep: Duration,
    pub compensation_retry: Duration,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: std::env::var("LOG_FORMAT")
                .map(|v| LogFormat::parse(&v))
                .unwrap_or(defaults.log_format),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            payment_timeout: Duration::from_millis(env_or("PAYMENT_TIMEOUT_MS", 10_000)),
            currency: std::env::var("CURRENCY")
                .map(|c| c.trim().to_ascii_uppercase())
                .unwrap_or(defaults.currency),
            open_hour: env_or("BUSINESS_OPEN_HOUR", defaults.open_hour),
            close_hour: env_or("BUSINESS_CLOSE_HOUR", defaults.close_hour),
            notification_sweep: Duration::from_secs(env_or("NOTIFICATION_SWEEP_SECS", 60)),
            compensation_retry: Duration::from_secs(env_or("COMPENSATION_RETRY_SECS", 30)),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn business_hours(&self) -> BusinessHours {
        BusinessHours {
            open_hour: self.open_hour,
            close_hour: self.close_hour,
            ..BusinessHours::default()
        }
    }

    /// The configured currency is the first accepted one and the one charged.
    pub fn payment_settings(&self) -> PaymentSettings {
        PaymentSettings {
            timeout: self.payment_timeout,
            currencies: vec![self.currency.clone()],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            payment_timeout: Duration::from_secs(10),
            currency: "USD".to_string(),
            open_hour: 9,
            close_hour: 17,
            notification_sweep: Duration::from_secs(60),
            compensation_retry: Duration::from_secs(30),
        }
    }
}
