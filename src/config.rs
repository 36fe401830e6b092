//! Configuration module for the management activity collector.
//!
//! This module provides environment-based configuration: the three Azure AD
//! credentials, the API endpoints, output file naming and rotation, and the
//! HTTP retry settings.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::client::RetryPolicy;

/// Default Azure AD login endpoint
pub const DEFAULT_LOGIN_URL: &str = "https://login.microsoftonline.com";

/// Default Office 365 Management API endpoint
pub const DEFAULT_API_URL: &str = "https://manage.office.com";

/// Default base name for event output files
pub const DEFAULT_OUTPUT_BASE: &str = "azure_ad_logs/management_activity_event_output";

/// Default extension for event output files
pub const DEFAULT_OUTPUT_EXTENSION: &str = ".json";

/// Default path of the process log file
pub const DEFAULT_LOG_FILE: &str = "azure_ad_logs/management_input.log";

/// Default rotation threshold in MiB
const DEFAULT_MAX_FILE_SIZE_MB: u64 = 500;

/// Upper bound for the rotation threshold (100 GiB)
const MAX_FILE_SIZE_MB_LIMIT: u64 = 102_400;

/// Default per-request timeout in seconds
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Default number of attempts per request (first try included)
const DEFAULT_MAX_ATTEMPTS: u64 = 5;

/// Upper bound for attempts per request
const MAX_ATTEMPTS_LIMIT: u64 = 20;

/// Default backoff factor in milliseconds
const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Azure AD application credentials.
///
/// The secret is never printed by the `Debug` implementation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub tenant_id: String,
    pub client_id: String,
    client_secret: String,
}

impl Credentials {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Configuration for the collector.
///
/// Credentials come from `TENANT_ID`, `CLIENT_ID` and `CLIENT_SECRET`; every
/// other setting has a default and an `MGMT_ACTIVITY_*` override:
/// - `MGMT_ACTIVITY_LOGIN_URL`: Azure AD login endpoint
/// - `MGMT_ACTIVITY_API_URL`: Management Activity API endpoint
/// - `MGMT_ACTIVITY_OUTPUT_BASE` / `MGMT_ACTIVITY_OUTPUT_EXTENSION`: output naming
/// - `MGMT_ACTIVITY_LOG_FILE`: process log file
/// - `MGMT_ACTIVITY_MAX_FILE_SIZE_MB`: rotation threshold (default: 500)
/// - `MGMT_ACTIVITY_REQUEST_TIMEOUT_SECS`: per-request timeout (default: 120)
/// - `MGMT_ACTIVITY_MAX_ATTEMPTS`: attempts per request (default: 5)
/// - `MGMT_ACTIVITY_BACKOFF_BASE_MS`: backoff factor (default: 1000)
/// - `MGMT_ACTIVITY_FOLLOW_PAGINATION`: follow `NextPageUri` (default: true)
#[derive(Debug, Clone)]
pub struct Config {
    /// Tenant and application credentials
    pub credentials: Credentials,

    /// Base URL of the OAuth2 token issuer
    pub login_url: String,

    /// Base URL of the Management Activity API
    pub api_url: String,

    /// Output file base name, may include a directory
    pub output_base: String,

    /// Output file extension including the dot
    pub output_extension: String,

    /// Path of the process log file
    pub log_file: PathBuf,

    /// Size in bytes after which output rotates to the next file
    pub max_file_size_bytes: u64,

    /// HTTP request timeout duration
    pub request_timeout: Duration,

    /// Maximum number of attempts per request
    pub max_attempts: u32,

    /// Backoff factor between retries
    pub backoff_base: Duration,

    /// Whether to follow `NextPageUri` on content listings
    pub follow_pagination: bool,
}

/// Error type for configuration loading failures
#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub env_var: Option<String>,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.env_var {
            Some(var) => write!(f, "Configuration error for {}: {}", var, self.message),
            None => write!(f, "Configuration error: {}", self.message),
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Build a configuration with default settings for the given credentials.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            login_url: DEFAULT_LOGIN_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            output_base: DEFAULT_OUTPUT_BASE.to_string(),
            output_extension: DEFAULT_OUTPUT_EXTENSION.to_string(),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE_MB * BYTES_PER_MIB,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS as u32,
            backoff_base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            follow_pagination: true,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `TENANT_ID`, `CLIENT_ID` or `CLIENT_SECRET` is missing or empty
    /// - a numeric `MGMT_ACTIVITY_*` setting is not a number or out of range
    /// - `MGMT_ACTIVITY_FOLLOW_PAGINATION` is not a boolean
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use management_activity_collector::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Output base: {}", config.output_base);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = Credentials::new(
            required(&lookup, "TENANT_ID")?,
            required(&lookup, "CLIENT_ID")?,
            required(&lookup, "CLIENT_SECRET")?,
        );

        let mut config = Self::new(credentials);

        if let Some(url) = lookup("MGMT_ACTIVITY_LOGIN_URL") {
            config.login_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = lookup("MGMT_ACTIVITY_API_URL") {
            config.api_url = url.trim_end_matches('/').to_string();
        }
        if let Some(base) = lookup("MGMT_ACTIVITY_OUTPUT_BASE") {
            config.output_base = base;
        }
        if let Some(extension) = lookup("MGMT_ACTIVITY_OUTPUT_EXTENSION") {
            config.output_extension = extension;
        }
        config.log_file = log_file_from_lookup(&lookup);

        let max_file_size_mb = parse_bounded(
            &lookup,
            "MGMT_ACTIVITY_MAX_FILE_SIZE_MB",
            DEFAULT_MAX_FILE_SIZE_MB,
            1,
            MAX_FILE_SIZE_MB_LIMIT,
        )?;
        config.max_file_size_bytes = max_file_size_mb * BYTES_PER_MIB;

        let timeout_secs = parse_bounded(
            &lookup,
            "MGMT_ACTIVITY_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
            1,
            3_600,
        )?;
        config.request_timeout = Duration::from_secs(timeout_secs);

        config.max_attempts = parse_bounded(
            &lookup,
            "MGMT_ACTIVITY_MAX_ATTEMPTS",
            DEFAULT_MAX_ATTEMPTS,
            1,
            MAX_ATTEMPTS_LIMIT,
        )? as u32;

        let backoff_ms = parse_bounded(
            &lookup,
            "MGMT_ACTIVITY_BACKOFF_BASE_MS",
            DEFAULT_BACKOFF_BASE_MS,
            0,
            60_000,
        )?;
        config.backoff_base = Duration::from_millis(backoff_ms);

        if let Some(value) = lookup("MGMT_ACTIVITY_FOLLOW_PAGINATION") {
            config.follow_pagination = parse_bool("MGMT_ACTIVITY_FOLLOW_PAGINATION", &value)?;
        }

        Ok(config)
    }

    /// Retry policy derived from the attempt and backoff settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_base: self.backoff_base,
            ..RetryPolicy::default()
        }
    }
}

/// Path of the process log file, from `MGMT_ACTIVITY_LOG_FILE`.
///
/// Read on its own so logging can start before the rest of the
/// configuration is validated.
pub fn log_file_from_env() -> PathBuf {
    log_file_from_lookup(|key| env::var(key).ok())
}

fn log_file_from_lookup<F>(lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    lookup("MGMT_ACTIVITY_LOG_FILE")
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_FILE))
}

fn required<F>(lookup: &F, env_var: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(env_var) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError {
            message: "required variable is missing or empty".to_string(),
            env_var: Some(env_var.to_string()),
        }),
    }
}

/// Parse an optional unsigned setting and check it against `[min, max]`.
fn parse_bounded<F>(
    lookup: &F,
    env_var: &str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(env_var) else {
        return Ok(default);
    };

    let parsed: u64 = value.trim().parse().map_err(|_| ConfigError {
        message: format!("'{}' is not a valid number", value),
        env_var: Some(env_var.to_string()),
    })?;

    if parsed < min {
        return Err(ConfigError {
            message: format!("value {} is below minimum ({})", parsed, min),
            env_var: Some(env_var.to_string()),
        });
    }

    if parsed > max {
        return Err(ConfigError {
            message: format!("value {} exceeds maximum ({})", parsed, max),
            env_var: Some(env_var.to_string()),
        });
    }

    Ok(parsed)
}

fn parse_bool(env_var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError {
            message: format!("'{}' is not a valid boolean", value),
            env_var: Some(env_var.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    const CREDENTIALS: [(&str, &str); 3] = [
        ("TENANT_ID", "tenant-1"),
        ("CLIENT_ID", "client-1"),
        ("CLIENT_SECRET", "s3cret"),
    ];

    fn with_credentials(extra: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let mut pairs: Vec<(&str, &str)> = CREDENTIALS.to_vec();
        pairs.extend_from_slice(extra);
        lookup_from(&pairs)
    }

    // Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        original: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let original = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                original,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.original {
                Some(val) => env::set_var(&self.key, val),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(with_credentials(&[])).expect("Should load with defaults");
        assert_eq!(config.credentials.tenant_id, "tenant-1");
        assert_eq!(config.credentials.client_id, "client-1");
        assert_eq!(config.credentials.client_secret(), "s3cret");
        assert_eq!(config.login_url, DEFAULT_LOGIN_URL);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.output_base, DEFAULT_OUTPUT_BASE);
        assert_eq!(config.output_extension, ".json");
        assert_eq!(config.log_file, PathBuf::from(DEFAULT_LOG_FILE));
        assert_eq!(config.max_file_size_bytes, 500 * 1024 * 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert!(config.follow_pagination);
    }

    #[test]
    fn test_custom_values() {
        let config = Config::from_lookup(with_credentials(&[
            ("MGMT_ACTIVITY_API_URL", "http://localhost:9000/"),
            ("MGMT_ACTIVITY_LOGIN_URL", "http://localhost:9001"),
            ("MGMT_ACTIVITY_OUTPUT_BASE", "/tmp/out/events"),
            ("MGMT_ACTIVITY_OUTPUT_EXTENSION", ".ndjson"),
            ("MGMT_ACTIVITY_MAX_FILE_SIZE_MB", "10"),
            ("MGMT_ACTIVITY_REQUEST_TIMEOUT_SECS", "30"),
            ("MGMT_ACTIVITY_MAX_ATTEMPTS", "3"),
            ("MGMT_ACTIVITY_BACKOFF_BASE_MS", "250"),
            ("MGMT_ACTIVITY_FOLLOW_PAGINATION", "false"),
        ]))
        .expect("Should load custom values");

        assert_eq!(config.api_url, "http://localhost:9000"); // Trailing slash removed
        assert_eq!(config.login_url, "http://localhost:9001");
        assert_eq!(config.output_base, "/tmp/out/events");
        assert_eq!(config.output_extension, ".ndjson");
        assert_eq!(config.max_file_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_base, Duration::from_millis(250));
        assert!(!config.follow_pagination);

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_base, Duration::from_millis(250));
    }

    #[test]
    fn test_missing_credential() {
        let lookup = lookup_from(&[("TENANT_ID", "tenant-1"), ("CLIENT_SECRET", "s3cret")]);
        let err = Config::from_lookup(lookup).unwrap_err();
        assert_eq!(err.env_var.as_deref(), Some("CLIENT_ID"));
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn test_empty_credential() {
        let lookup = lookup_from(&[
            ("TENANT_ID", "tenant-1"),
            ("CLIENT_ID", "client-1"),
            ("CLIENT_SECRET", "  "),
        ]);
        let err = Config::from_lookup(lookup).unwrap_err();
        assert_eq!(err.env_var.as_deref(), Some("CLIENT_SECRET"));
    }

    #[test]
    fn test_invalid_number() {
        let err = Config::from_lookup(with_credentials(&[(
            "MGMT_ACTIVITY_MAX_FILE_SIZE_MB",
            "lots",
        )]))
        .unwrap_err();
        assert!(err.message.contains("not a valid number"));
    }

    #[test]
    fn test_attempts_below_min() {
        let err = Config::from_lookup(with_credentials(&[("MGMT_ACTIVITY_MAX_ATTEMPTS", "0")]))
            .unwrap_err();
        assert!(err.message.contains("below minimum"));
    }

    #[test]
    fn test_file_size_exceeds_max() {
        let err = Config::from_lookup(with_credentials(&[(
            "MGMT_ACTIVITY_MAX_FILE_SIZE_MB",
            "999999",
        )]))
        .unwrap_err();
        assert!(err.message.contains("exceeds maximum"));
    }

    #[test]
    fn test_invalid_boolean() {
        let err = Config::from_lookup(with_credentials(&[(
            "MGMT_ACTIVITY_FOLLOW_PAGINATION",
            "maybe",
        )]))
        .unwrap_err();
        assert!(err.message.contains("not a valid boolean"));
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let credentials = Credentials::new("tenant", "client", "hunter2");
        let rendered = format!("{:?}", credentials);
        assert!(rendered.contains("tenant"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_config_from_env() {
        let _guard1 = EnvGuard::set("TENANT_ID", "env-tenant");
        let _guard2 = EnvGuard::set("CLIENT_ID", "env-client");
        let _guard3 = EnvGuard::set("CLIENT_SECRET", "env-secret");
        let _guard4 = EnvGuard::set("MGMT_ACTIVITY_LOG_FILE", "/var/log/mgmt/input.log");

        let config = Config::from_env().expect("Should load from process environment");
        assert_eq!(config.credentials.tenant_id, "env-tenant");
        assert_eq!(config.credentials.client_id, "env-client");
        assert_eq!(config.credentials.client_secret(), "env-secret");

        // Logging and the loaded config resolve the same path
        assert_eq!(log_file_from_env(), config.log_file);
        assert_eq!(config.log_file, PathBuf::from("/var/log/mgmt/input.log"));
    }

    #[test]
    fn test_blank_log_file_uses_default() {
        let config = Config::from_lookup(with_credentials(&[("MGMT_ACTIVITY_LOG_FILE", "  ")])).unwrap();
        assert_eq!(config.log_file, PathBuf::from(DEFAULT_LOG_FILE));
        assert_eq!(
            log_file_from_lookup(lookup_from(&[("MGMT_ACTIVITY_LOG_FILE", "")])),
            PathBuf::from(DEFAULT_LOG_FILE)
        );
    }

    #[test]
    fn test_config_error_display() {
        let error = ConfigError {
            message: "test error".to_string(),
            env_var: Some("TEST_VAR".to_string()),
        };
        assert_eq!(
            format!("{}", error),
            "Configuration error for TEST_VAR: test error"
        );

        let error_no_var = ConfigError {
            message: "general error".to_string(),
            env_var: None,
        };
        assert_eq!(
            format!("{}", error_no_var),
            "Configuration error: general error"
        );
    }
}
