//! Configuration model for the dispatch service
//!
//! The configuration is a single YAML document. Every section and field has a
//! default so an empty file is a valid (in-memory, local) configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

/// Root configuration document
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub connections: ConnectionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            host: default_host(),
            http_port: default_http_port(),
            websocket_port: default_websocket_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default)]
    pub level: Option<String>,
}

impl LoggingConfig {
    pub fn level_or_default(&self) -> String {
        self.level.clone().unwrap_or_else(default_log_level)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
        }
    }
}

/// Offer fan-out and arbitration settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchingConfig {
    /// Hard upper bound on how long a ride waits for an acceptance
    #[serde(default = "default_offer_window_seconds")]
    pub offer_window_seconds: u64,
    /// Maximum number of candidates requested from the locator
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
    /// Fraction of the estimated fare quoted to the driver
    #[serde(default = "default_driver_earnings_share")]
    pub driver_earnings_share: f64,
    /// Radius used when a ride request carries no positive max distance
    #[serde(default = "default_search_radius_km")]
    pub default_search_radius_km: f64,
}

impl MatchingConfig {
    pub fn offer_window(&self) -> Duration {
        Duration::from_secs(self.offer_window_seconds)
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            offer_window_seconds: default_offer_window_seconds(),
            candidate_limit: default_candidate_limit(),
            driver_earnings_share: default_driver_earnings_share(),
            default_search_radius_km: default_search_radius_km(),
        }
    }
}

/// Driver socket timing and buffering
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_auth_timeout_seconds")]
    pub auth_timeout_seconds: u64,
    #[serde(default = "default_location_update_interval_seconds")]
    pub location_update_interval_seconds: u64,
    #[serde(default = "default_ping_interval_seconds")]
    pub ping_interval_seconds: u64,
    #[serde(default = "default_read_timeout_seconds")]
    pub read_timeout_seconds: u64,
    #[serde(default = "default_write_timeout_seconds")]
    pub write_timeout_seconds: u64,
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

impl ConnectionConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_seconds)
    }

    pub fn location_update_interval(&self) -> Duration {
        Duration::from_secs(self.location_update_interval_seconds)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            auth_timeout_seconds: default_auth_timeout_seconds(),
            location_update_interval_seconds: default_location_update_interval_seconds(),
            ping_interval_seconds: default_ping_interval_seconds(),
            read_timeout_seconds: default_read_timeout_seconds(),
            write_timeout_seconds: default_write_timeout_seconds(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// `memory` or `postgres`
    #[serde(rename = "type")]
    #[serde(default = "default_store_type")]
    pub store_type: String,
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    /// Drivers loaded into the in-memory store at startup
    #[serde(default)]
    pub seed_drivers: Vec<SeedDriver>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: default_store_type(),
            postgres: None,
            seed_drivers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_postgres_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
}

impl PostgresConfig {
    /// Connection URL in libpq form
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SeedDriver {
    pub id: String,
    pub vehicle_type: String,
    #[serde(default = "default_seed_rating")]
    pub rating: f64,
    #[serde(default = "default_seed_status")]
    pub status: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}
