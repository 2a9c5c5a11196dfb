use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub stripe: StripeConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default = "default_currency")]
    pub currency: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-request timeout for the webhook/health surface, in seconds.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    // The pool is the one shared resource; both bounds are explicit rather
    // than left to driver defaults. Workers hold a connection only for the
    // duration of a single short transaction, so the pool can be much
    // smaller than the worker count.
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeeConfig {
    pub enabled: bool,
    /// Provider percentage, e.g. 2.9 for 2.9%.
    pub percent: f64,
    /// Provider flat fee in minor currency units, e.g. 30 for $0.30.
    pub flat_cents: i64,
    pub refundable: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// Worker slots per process pulling from the payment queues.
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub max_attempts: i64,
}

fn default_currency() -> String {
    "usd".to_string()
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            percent: 0.0,
            flat_cents: 0,
            refundable: false,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 500,
            max_attempts: 5,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("server.request_timeout_secs", 30)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("stripe.enabled", false)?
            .set_default("fees.enabled", false)?
            .set_default("fees.percent", 0.0)?
            .set_default("fees.flat_cents", 0)?
            .set_default("fees.refundable", false)?
            .set_default("queue.concurrency", 4)?
            .set_default("queue.poll_interval_ms", 500)?
            .set_default("queue.max_attempts", 5)?
            .set_default("currency", "usd")?

            // Add config file if it exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // Add environment variables (with REMIT__ prefix, double underscore separates levels)
            .add_source(Environment::with_prefix("REMIT").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                request_timeout_secs: 30,
            },
            database: DatabaseConfig {
                url: "sqlite://remit.db".to_string(),
                max_connections: 10,
                min_connections: 1,
            },
            stripe: StripeConfig {
                secret_key: None,
                webhook_secret: None,
                enabled: false,
            },
            fees: FeeConfig::default(),
            queue: QueueConfig::default(),
            currency: "usd".to_string(),
        }
    }
}
