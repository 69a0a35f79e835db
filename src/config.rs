use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Payment gateway configuration. The gateway returns a redirectable
/// payment session (an external "preference") the storefront sends the
/// buyer to.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct PaymentConfig {
    /// Gateway API base URL.
    #[serde(default = "default_payment_base_url")]
    pub base_url: String,

    /// Bearer token for the gateway API.
    #[serde(default)]
    pub access_token: String,

    /// Provider tag recorded on payment intents.
    #[serde(default = "default_payment_provider")]
    pub provider: String,

    /// Webhook address the gateway notifies with payment results.
    #[serde(default)]
    pub notification_url: Option<String>,

    /// Where the gateway redirects the buyer after success/failure.
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub failure_url: Option<String>,

    /// Request timeout for gateway calls, in seconds.
    #[serde(default = "default_payment_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            base_url: default_payment_base_url(),
            access_token: String::new(),
            provider: default_payment_provider(),
            notification_url: None,
            success_url: None,
            failure_url: None,
            timeout_secs: default_payment_timeout_secs(),
        }
    }
}

fn default_payment_base_url() -> String {
    "https://api.mercadopago.com".to_string()
}

fn default_payment_provider() -> String {
    "mercadopago".to_string()
}

fn default_payment_timeout_secs() -> u64 {
    15
}

/// Application configuration with validation.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL.
    pub database_url: String,

    /// JWT secret used to verify storefront bearer tokens.
    #[validate(length(min = 64))]
    pub jwt_secret: String,

    /// Server host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (development, staging, production).
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level filter.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit structured JSON logs.
    #[serde(default)]
    pub log_json: bool,

    /// Currency every checkout is priced in.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// CORS: comma-separated storefront origins.
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool sizing.
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Payment gateway settings.
    #[serde(default)]
    pub payment: PaymentConfig,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_currency() -> String {
    "PEN".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

impl AppConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Loads configuration from `config/{default,<env>}.toml` plus `APP_`
/// environment variables. Later layers win.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let run_env = env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder()
        .set_default("environment", run_env.clone())?
        .set_default("database_url", "postgres://localhost/schoolkit")?;

    let default_file = Path::new(CONFIG_DIR).join("default.toml");
    if default_file.exists() {
        builder = builder.add_source(File::from(default_file));
    }
    let env_file = Path::new(CONFIG_DIR).join(format!("{}.toml", run_env));
    if env_file.exists() {
        builder = builder.add_source(File::from(env_file));
    }

    builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;

    if cfg.jwt_secret.is_empty() {
        if cfg.is_production() {
            return Err(ConfigError::Message(
                "jwt_secret must be set in production".to_string(),
            ));
        }
        cfg.jwt_secret = DEV_DEFAULT_JWT_SECRET.to_string();
    }

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(environment = %cfg.environment, "Configuration loaded");
    Ok(cfg)
}

/// Installs the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_payment_config_targets_gateway() {
        let cfg = PaymentConfig::default();
        assert_eq!(cfg.base_url, "https://api.mercadopago.com");
        assert_eq!(cfg.timeout_secs, 15);
    }

    #[test]
    fn bind_address_joins_host_and_port() {
        let cfg = AppConfig {
            database_url: "sqlite::memory:".into(),
            jwt_secret: DEV_DEFAULT_JWT_SECRET.into(),
            host: "127.0.0.1".into(),
            port: 9000,
            environment: "development".into(),
            log_level: "debug".into(),
            log_json: false,
            currency: "PEN".into(),
            cors_allowed_origins: None,
            db_max_connections: 5,
            db_min_connections: 1,
            payment: PaymentConfig::default(),
        };
        assert_eq!(cfg.bind_address(), "127.0.0.1:9000");
        assert!(!cfg.is_production());
    }
}
