use crate::*;
use thiserror::Error;

const LOG_FORMATS: [&str; 3] = ["pretty", "json", "compact"];
const STORE_TYPES: [&str; 2] = ["memory", "postgres"];
const VEHICLE_TYPES: [&str; 3] = ["ECONOMY", "PREMIUM", "XL"];
const DRIVER_STATUSES: [&str; 4] = ["AVAILABLE", "BUSY", "EN_ROUTE", "OFFLINE"];

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Service name is required")]
    MissingServiceName,

    #[error("{field} must not be 0")]
    InvalidPort { field: String },

    #[error("HTTP and WebSocket ports must differ, both are {port}")]
    PortCollision { port: u16 },

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("{field} must be a positive float")]
    InvalidPositiveFloat { field: String },

    #[error("driver_earnings_share must be in (0, 1], got {0}")]
    InvalidEarningsShare(f64),

    #[error("Connections: {message}")]
    InvalidConnections { message: String },

    #[error("Invalid store type: {0}. Must be one of: memory, postgres")]
    InvalidStoreType(String),

    #[error("Store: {message}")]
    InvalidStore { message: String },

    #[error("Seed driver '{id}': {message}")]
    InvalidSeedDriver { id: String, message: String },

    #[error("Environment variable '{var}' is missing: {message}")]
    InvalidEnvVar { var: String, message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &DispatchConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    validate_service(&config.service, &mut report);
    validate_logging(&config.logging, &mut report);
    validate_matching(&config.matching, &mut report);
    validate_connections(&config.connections, &mut report);
    validate_store(&config.store, &mut report);
    validate_metrics(config, &mut report);
    validate_env_placeholders(config, &mut report);

    report
}

fn validate_service(service: &ServiceConfig, report: &mut ValidationReport) {
    if service.name.trim().is_empty() {
        report.add_error(ValidationError::MissingServiceName);
    }

    for (field, port) in [
        ("service.http_port", service.http_port),
        ("service.websocket_port", service.websocket_port),
    ] {
        if port == 0 {
            report.add_error(ValidationError::InvalidPort {
                field: field.to_string(),
            });
        } else if port < 1024 {
            report.add_warning(field, "Privileged port (requires elevated permissions)");
        }
    }

    if service.http_port != 0 && service.http_port == service.websocket_port {
        report.add_error(ValidationError::PortCollision {
            port: service.http_port,
        });
    }
}

fn validate_logging(logging: &LoggingConfig, report: &mut ValidationReport) {
    if !LOG_FORMATS.contains(&logging.format.to_lowercase().as_str()) {
        report.add_error(ValidationError::InvalidLogFormat(logging.format.clone()));
    }

    if logging.level.is_none() {
        report.add_default("logging.level", &default_log_level());
    }
}

fn validate_matching(matching: &MatchingConfig, report: &mut ValidationReport) {
    if matching.offer_window_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "matching.offer_window_seconds".to_string(),
        });
    } else if matching.offer_window_seconds > 120 {
        report.add_warning(
            "matching.offer_window_seconds",
            "Riders wait up to this long for a match; values above 120s are unusual",
        );
    }

    if matching.candidate_limit == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "matching.candidate_limit".to_string(),
        });
    }

    let share = matching.driver_earnings_share;
    if !(share > 0.0 && share <= 1.0) {
        report.add_error(ValidationError::InvalidEarningsShare(share));
    }

    if !(matching.default_search_radius_km > 0.0) {
        report.add_error(ValidationError::InvalidPositiveFloat {
            field: "matching.default_search_radius_km".to_string(),
        });
    }
}

fn validate_connections(connections: &ConnectionConfig, report: &mut ValidationReport) {
    for (field, value) in [
        ("connections.auth_timeout_seconds", connections.auth_timeout_seconds),
        ("connections.ping_interval_seconds", connections.ping_interval_seconds),
        ("connections.read_timeout_seconds", connections.read_timeout_seconds),
        ("connections.write_timeout_seconds", connections.write_timeout_seconds),
        (
            "connections.outbound_queue_capacity",
            connections.outbound_queue_capacity as u64,
        ),
    ] {
        if value == 0 {
            report.add_error(ValidationError::InvalidPositiveInteger {
                field: field.to_string(),
            });
        }
    }

    if connections.ping_interval_seconds >= connections.read_timeout_seconds {
        report.add_error(ValidationError::InvalidConnections {
            message: format!(
                "ping_interval_seconds ({}) must be below read_timeout_seconds ({})",
                connections.ping_interval_seconds, connections.read_timeout_seconds
            ),
        });
    }

    if connections.location_update_interval_seconds == 0 {
        report.add_warning(
            "connections.location_update_interval_seconds",
            "Location updates are not rate limited",
        );
    }
}

fn validate_store(store: &StoreConfig, report: &mut ValidationReport) {
    let store_type = store.store_type.to_lowercase();
    if !STORE_TYPES.contains(&store_type.as_str()) {
        report.add_error(ValidationError::InvalidStoreType(store.store_type.clone()));
        return;
    }

    if store_type == "postgres" {
        match &store.postgres {
            None => report.add_error(ValidationError::InvalidStore {
                message: "postgres section is required when type is postgres".to_string(),
            }),
            Some(pg) => {
                if pg.host.is_empty() || pg.database.is_empty() || pg.user.is_empty() {
                    report.add_error(ValidationError::InvalidStore {
                        message: "postgres host, database and user are required".to_string(),
                    });
                }
                if pg.max_connections == 0 {
                    report.add_error(ValidationError::InvalidPositiveInteger {
                        field: "store.postgres.max_connections".to_string(),
                    });
                }
            }
        }
        if !store.seed_drivers.is_empty() {
            report.add_warning(
                "store.seed_drivers",
                "Seed drivers are only loaded into the memory store and will be ignored",
            );
        }
    } else {
        report.add_warning("store.type", "In-memory store: driver state is lost on restart");
    }

    let mut seen = std::collections::HashSet::new();
    for driver in &store.seed_drivers {
        let mut invalid = |message: String| {
            report.add_error(ValidationError::InvalidSeedDriver {
                id: driver.id.clone(),
                message,
            })
        };

        if driver.id.trim().is_empty() {
            invalid("id is required".to_string());
        }
        if !seen.insert(driver.id.clone()) {
            invalid("duplicate id".to_string());
        }
        if !VEHICLE_TYPES.contains(&driver.vehicle_type.to_uppercase().as_str()) {
            invalid(format!("unknown vehicle_type {}", driver.vehicle_type));
        }
        if !DRIVER_STATUSES.contains(&driver.status.to_uppercase().as_str()) {
            invalid(format!("unknown status {}", driver.status));
        }
        if !(1.0..=5.0).contains(&driver.rating) {
            invalid(format!("rating must be between 1 and 5, got {}", driver.rating));
        }
        if !(-90.0..=90.0).contains(&driver.latitude) || !(-180.0..=180.0).contains(&driver.longitude) {
            invalid(format!(
                "coordinates out of range: {}, {}",
                driver.latitude, driver.longitude
            ));
        }
    }
}

fn validate_metrics(config: &DispatchConfig, report: &mut ValidationReport) {
    if !config.metrics.enabled {
        return;
    }
    if config.metrics.port == 0 {
        report.add_error(ValidationError::InvalidPort {
            field: "metrics.port".to_string(),
        });
    } else if config.metrics.port == config.service.http_port
        || config.metrics.port == config.service.websocket_port
    {
        report.add_error(ValidationError::PortCollision {
            port: config.metrics.port,
        });
    }
}

fn validate_env_placeholders(config: &DispatchConfig, report: &mut ValidationReport) {
    let Ok(rendered) = serde_yaml::to_string(config) else {
        return;
    };
    for var in unresolved_env_vars(&rendered) {
        report.add_error(ValidationError::InvalidEnvVar {
            var,
            message: "placeholder was not substituted".to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let report = validate_config(&DispatchConfig::default());
        assert!(report.is_valid(), "{:?}", report.errors);
        assert!(report
            .defaults_applied
            .iter()
            .any(|d| d.field == "logging.level" && d.value == "info"));
        assert!(report.warnings.iter().any(|w| w.field == "store.type"));
    }

    #[test]
    fn test_invalid_matching_values() {
        let mut config = DispatchConfig::default();
        config.matching.offer_window_seconds = 0;
        config.matching.driver_earnings_share = 1.5;
        config.matching.candidate_limit = 0;

        let report = validate_config(&config);
        assert!(!report.is_valid());
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidEarningsShare(s) if *s == 1.5)));
        assert_eq!(
            report
                .errors
                .iter()
                .filter(|e| matches!(e, ValidationError::InvalidPositiveInteger { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_long_offer_window_is_a_warning() {
        let mut config = DispatchConfig::default();
        config.matching.offer_window_seconds = 300;
        let report = validate_config(&config);
        assert!(report.is_valid());
        assert!(report
            .warnings
            .iter()
            .any(|w| w.field == "matching.offer_window_seconds"));
    }

    #[test]
    fn test_ping_must_be_below_read_timeout() {
        let mut config = DispatchConfig::default();
        config.connections.ping_interval_seconds = 60;
        config.connections.read_timeout_seconds = 60;
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidConnections { .. })));
    }

    #[test]
    fn test_postgres_requires_section() {
        let mut config = DispatchConfig::default();
        config.store.store_type = "postgres".to_string();
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidStore { .. })));

        config.store.store_type = "redis".to_string();
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidStoreType(t) if t == "redis")));
    }

    #[test]
    fn test_seed_driver_checks() {
        let mut config = DispatchConfig::default();
        config.store.seed_drivers = vec![
            SeedDriver {
                id: "d1".to_string(),
                vehicle_type: "BOAT".to_string(),
                rating: 0.5,
                status: "AVAILABLE".to_string(),
                latitude: 91.0,
                longitude: 0.0,
            },
            SeedDriver {
                id: "d1".to_string(),
                vehicle_type: "economy".to_string(),
                rating: 4.0,
                status: "available".to_string(),
                latitude: 10.0,
                longitude: 10.0,
            },
        ];
        let report = validate_config(&config);
        let seed_errors = report
            .errors
            .iter()
            .filter(|e| matches!(e, ValidationError::InvalidSeedDriver { .. }))
            .count();
        // vehicle type, rating, coordinates on the first; duplicate id on the second
        assert_eq!(seed_errors, 4);
    }

    #[test]
    fn test_unresolved_placeholder_is_an_error() {
        let mut config = DispatchConfig::default();
        config.store.store_type = "postgres".to_string();
        config.store.postgres = Some(PostgresConfig {
            host: "localhost".to_string(),
            port: 5432,
            database: "rides".to_string(),
            user: "dispatch".to_string(),
            password: "${DISPATCH_DB_PASSWORD}".to_string(),
            ssl_mode: "disable".to_string(),
            max_connections: 5,
            connection_timeout_seconds: 5,
        });
        let report = validate_config(&config);
        assert!(report.errors.iter().any(
            |e| matches!(e, ValidationError::InvalidEnvVar { var, .. } if var == "DISPATCH_DB_PASSWORD")
        ));
    }

    #[test]
    fn test_port_collisions() {
        let mut config = DispatchConfig::default();
        config.service.websocket_port = config.service.http_port;
        config.metrics.enabled = true;
        config.metrics.port = 0;
        let report = validate_config(&config);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::PortCollision { .. })));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidPort { field } if field == "metrics.port")));
    }
}
