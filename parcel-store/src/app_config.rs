use parcel_core::{SEQUENCE_SEED, SHIPMENT_SEQUENCE};
use parcel_shipment::AssemblySettings;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub sequence: SequenceConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub kafka: Option<KafkaConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    /// Upper bound a counter allocation waits for the row lock
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,
}

fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout() -> u64 { 3 }
fn default_lock_timeout() -> u64 { 2000 }

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SequenceConfig {
    pub name: String,
    pub seed: i64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            name: SHIPMENT_SEQUENCE.to_string(),
            seed: SEQUENCE_SEED,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RoutingConfig {
    #[serde(default)]
    pub require_pickup_partner: bool,
    #[serde(default)]
    pub require_delivery_partner: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssemblyConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_max_attempts() -> u32 { 1 }

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self { max_attempts: default_max_attempts() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "parcel_store=info,parcel_shipment=info,parcel_core=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: default_filter() }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String {
    "parcel.shipments".to_string()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `PARCEL__DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("PARCEL").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn assembly_settings(&self) -> AssemblySettings {
        AssemblySettings {
            sequence_name: self.sequence.name.clone(),
            require_pickup_partner: self.routing.require_pickup_partner,
            require_delivery_partner: self.routing.require_delivery_partner,
            max_attempts: self.assembly.max_attempts,
        }
    }
}
