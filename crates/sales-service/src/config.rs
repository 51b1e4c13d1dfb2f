//! Service configuration loaded from environment variables.

use std::time::Duration;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST` / `PORT`: metrics listener address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `json` for JSON lines, anything else for human-readable
/// - `DATABASE_URL`: PostgreSQL connection; in-memory store when unset
/// - `LEDGER_SERVICE_URL`, `AUDIT_SERVICE_URL`, `KEY_SERVICE_URL`
/// - `ENCRYPTION_KEY`: local base64 key; fetched from the key service when unset
/// - `ENCRYPTION_KEY_NAME` (default `encryption_key`)
/// - `CIRCUIT_BREAKER_FAIL_MAX` (default 5)
/// - `CIRCUIT_BREAKER_RESET_TIMEOUT`: seconds (default 60)
/// - `SERVICE_CALL_TIMEOUT_MS` (default 5000)
/// - `RECONCILE_INTERVAL_SECS` (default 60, must be positive)
/// - `RECONCILE_GRACE_SECS` (default 300, raised to twice the call timeout)
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub ledger_url: String,
    pub audit_url: String,
    pub key_url: String,
    pub encryption_key: Option<String>,
    pub encryption_key_name: String,
    pub breaker_failure_threshold: u32,
    pub breaker_reset_timeout: Duration,
    pub call_timeout: Duration,
    pub reconcile_interval: Duration,
    pub reconcile_grace: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from any key lookup. Unparseable values fall back
    /// to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str, default: String| lookup(key).unwrap_or(default);
        let optional = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let number = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };
        let positive = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };

        let call_timeout = Duration::from_millis(positive(
            "SERVICE_CALL_TIMEOUT_MS",
            defaults.call_timeout.as_millis() as u64,
        ));
        // A debit may still be in flight until the call timeout has passed;
        // reversing it earlier would record a no-op reversal ahead of it.
        let reconcile_grace = Duration::from_secs(number(
            "RECONCILE_GRACE_SECS",
            defaults.reconcile_grace.as_secs(),
        ))
        .max(call_timeout * 2);

        Self {
            host: text("HOST", defaults.host),
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            log_level: text("RUST_LOG", defaults.log_level),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
            database_url: optional("DATABASE_URL"),
            ledger_url: text("LEDGER_SERVICE_URL", defaults.ledger_url),
            audit_url: text("AUDIT_SERVICE_URL", defaults.audit_url),
            key_url: text("KEY_SERVICE_URL", defaults.key_url),
            encryption_key: optional("ENCRYPTION_KEY"),
            encryption_key_name: text("ENCRYPTION_KEY_NAME", defaults.encryption_key_name),
            breaker_failure_threshold: lookup("CIRCUIT_BREAKER_FAIL_MAX")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.breaker_failure_threshold),
            breaker_reset_timeout: Duration::from_secs(number(
                "CIRCUIT_BREAKER_RESET_TIMEOUT",
                defaults.breaker_reset_timeout.as_secs(),
            )),
            call_timeout,
            reconcile_interval: Duration::from_secs(positive(
                "RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval.as_secs(),
            )),
            reconcile_grace,
        }
    }

    /// Returns the `"host:port"` metrics listener address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            ledger_url: "http://127.0.0.1:5001".to_string(),
            audit_url: "http://127.0.0.1:5005".to_string(),
            key_url: "http://127.0.0.1:5005".to_string(),
            encryption_key: None,
            encryption_key_name: "encryption_key".to_string(),
            breaker_failure_threshold: 5,
            breaker_reset_timeout: Duration::from_secs(60),
            call_timeout: Duration::from_millis(5000),
            reconcile_interval: Duration::from_secs(60),
            reconcile_grace: Duration::from_secs(300),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("addr", &self.addr())
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .field("database", &self.database_url.as_ref().map(|_| "<configured>"))
            .field("ledger_url", &self.ledger_url)
            .field("audit_url", &self.audit_url)
            .field("key_url", &self.key_url)
            .field("encryption_key", &self.encryption_key.as_ref().map(|_| "<redacted>"))
            .field("encryption_key_name", &self.encryption_key_name)
            .field("breaker_failure_threshold", &self.breaker_failure_threshold)
            .field("breaker_reset_timeout", &self.breaker_reset_timeout)
            .field("call_timeout", &self.call_timeout)
            .field("reconcile_interval", &self.reconcile_interval)
            .field("reconcile_grace", &self.reconcile_grace)
            .finish()
    }
}
