use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub service: ServiceConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub business_rules: BusinessRules,
    pub payment_gateway: PaymentGatewayConfig,
    pub smtp: SmtpConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// Routes are served under `/{name}/{version}`.
#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub version: String,
    /// Externally reachable origin, used to build the payment callback URL.
    pub public_base_url: String,
}

impl ServiceConfig {
    pub fn api_prefix(&self) -> String {
        format!("/{}/{}", self.name, self.version)
    }

    pub fn callback_url(&self) -> String {
        format!(
            "{}{}/payment-callbacks",
            self.public_base_url.trim_end_matches('/'),
            self.api_prefix()
        )
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String {
    coachline_shared::models::events::TRIP_SUPPORT_TOPIC.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BusinessRules {
    pub booking_waiting_minutes: i64,
    pub otp_waiting_minutes: i64,
    pub e_ticket_otp_waiting_minutes: i64,
    pub gateway_timeout_seconds: u64,
    /// OTP submissions allowed per verification id per window.
    #[serde(default = "default_otp_attempts")]
    pub otp_attempts_per_window: i64,
    #[serde(default = "default_otp_window")]
    pub otp_window_seconds: i64,
    /// Per client IP, across all routes.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: i64,
}

fn default_otp_attempts() -> i64 {
    5
}

fn default_otp_window() -> i64 {
    300
}

fn default_requests_per_minute() -> i64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentGatewayConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    /// Set for S3-compatible stores such as MinIO.
    pub endpoint: Option<String>,
    pub public_base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    pub poll_interval_seconds: u64,
    pub batch_size: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 5,
            batch_size: 50,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `COACHLINE__SMTP__PASSWORD=...`
            .add_source(config::Environment::with_prefix("COACHLINE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
