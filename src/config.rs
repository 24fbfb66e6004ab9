use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_JWT_SECRET: &str = "development-only-signing-key-change-me-before-deploying";

/// Origins that may call the API with credentials in every environment.
pub const DEFAULT_ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:8888",
    "http://127.0.0.1:3000",
];

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Postgres connection string of the managed data store
    #[serde(alias = "supabase_url")]
    pub database_url: String,

    /// Accepted for compatibility; the credential travels inside `database_url`
    #[serde(default)]
    pub supabase_service_key: Option<String>,

    /// Token signing key
    #[validate(length(min = 32), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Secret appended to passwords by the legacy digest scheme (defaults to the signing key)
    #[serde(default)]
    pub legacy_password_secret: Option<String>,

    /// bcrypt cost for new password hashes
    #[validate(range(min = 4, max = 31))]
    #[serde(default = "default_password_hash_cost")]
    pub password_hash_cost: u32,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[validate(custom = "validate_log_level")]
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// Card processor credentials
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    /// Maximum age of a signed webhook timestamp
    #[serde(default = "default_webhook_tolerance_secs")]
    pub stripe_webhook_tolerance_secs: u64,

    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    /// Wallet processor credentials
    #[serde(default)]
    pub paypal_client_id: Option<String>,

    #[serde(default)]
    pub paypal_client_secret: Option<String>,

    #[serde(default = "default_true_bool")]
    pub paypal_sandbox: bool,

    /// Key for personal data at rest; required in production
    #[serde(default)]
    pub encryption_key: Option<String>,

    /// Comma-separated administrator IP allowlist; empty allows all
    #[serde(default)]
    pub admin_allowed_ips: Option<String>,

    /// Public base URL used to build redirect targets
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub site_url: Option<String>,

    /// Extra comma-separated CORS origins on top of the built-in list
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// ISO currency code, lowercase (single currency per deployment)
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Discounted subtotal (minor units) at or above which shipping is free
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: i64,

    /// Standard shipping charge in minor units
    #[serde(default = "default_standard_shipping")]
    pub standard_shipping: i64,

    /// Comma-separated ISO country codes the card processor collects addresses for
    #[serde(default = "default_shipping_countries")]
    pub shipping_countries: String,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            supabase_service_key: None,
            jwt_secret,
            legacy_password_secret: None,
            password_hash_cost: default_password_hash_cost(),
            host: default_host(),
            port: default_port(),
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            stripe_api_base: default_stripe_api_base(),
            paypal_client_id: None,
            paypal_client_secret: None,
            paypal_sandbox: true,
            encryption_key: None,
            admin_allowed_ips: None,
            url: None,
            site_url: None,
            cors_allowed_origins: None,
            currency: default_currency(),
            free_shipping_threshold: default_free_shipping_threshold(),
            standard_shipping: default_standard_shipping(),
            shipping_countries: default_shipping_countries(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Cookies carry `Secure` everywhere except local development.
    pub fn secure_cookies(&self) -> bool {
        !self.is_development()
    }

    /// Public base URL, preferring `SITE_URL` over `URL`.
    pub fn public_base_url(&self) -> String {
        self.site_url
            .as_deref()
            .or(self.url.as_deref())
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }

    pub fn legacy_password_secret(&self) -> &str {
        self.legacy_password_secret
            .as_deref()
            .unwrap_or(&self.jwt_secret)
    }

    pub fn admin_allowed_ips(&self) -> Vec<String> {
        split_list(self.admin_allowed_ips.as_deref())
    }

    pub fn cors_origins(&self) -> Vec<String> {
        let mut origins: Vec<String> = DEFAULT_ALLOWED_ORIGINS
            .iter()
            .map(|o| o.to_string())
            .collect();
        origins.extend(split_list(self.cors_allowed_origins.as_deref()));
        origins.push(self.public_base_url());
        origins.sort();
        origins.dedup();
        origins
    }

    pub fn shipping_countries(&self) -> Vec<String> {
        split_list(Some(&self.shipping_countries))
    }

    pub fn paypal_api_base(&self) -> &'static str {
        if self.paypal_sandbox {
            "https://api-m.sandbox.paypal.com"
        } else {
            "https://api-m.paypal.com"
        }
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.is_production()
            && self
                .encryption_key
                .as_deref()
                .map_or(true, |k| k.trim().is_empty())
        {
            let mut err = ValidationError::new("encryption_key_required");
            err.message =
                Some("ENCRYPTION_KEY must be set in production to protect personal data".into());
            errors.add("encryption_key", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The development JWT secret must not be used outside development. Set JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self.standard_shipping < 0 || self.free_shipping_threshold < 0 {
            let mut err = ValidationError::new("shipping_negative");
            err.message = Some("Shipping amounts must not be negative".into());
            errors.add("standard_shipping", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_password_hash_cost() -> u32 {
    12
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_webhook_tolerance_secs() -> u64 {
    300
}
fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}
fn default_true_bool() -> bool {
    true
}
fn default_currency() -> String {
    "gbp".to_string()
}
fn default_free_shipping_threshold() -> i64 {
    2000
}
fn default_standard_shipping() -> i64 {
    349
}
fn default_shipping_countries() -> String {
    "GB".to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    const DISALLOWED: [&str; 3] = ["your-secret-key", "default-secret-key", "changeme"];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret must be overridden with a secure random value".into());
        return Err(err);
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("jwt_secret");
        err.message =
            Some("JWT secret must have at least 10 unique characters for adequate entropy".into());
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. config/default.toml and config/{env}.toml
/// 3. Plain environment variables (`JWT_SECRET`, `STRIPE_SECRET_KEY`, ...)
/// 4. `APP__`-prefixed environment variables
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("ENVIRONMENT"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    // jwt_secret has no default outside development.
    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?;
    if run_env.eq_ignore_ascii_case(DEFAULT_ENV) {
        builder = builder.set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET)?;
    }

    let config = builder
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::default().try_parsing(true))
        .add_source(
            Environment::with_prefix("APP")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set JWT_SECRET to a secure random string.");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured".into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!(
        environment = %app_config.environment,
        encryption = app_config.encryption_key.is_some(),
        "Configuration loaded successfully"
    );
    Ok(app_config)
}
