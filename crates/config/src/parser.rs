use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<DispatchConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());
    parse_config(&content)
}

/// Parse a YAML document after environment substitution
pub fn parse_config(content: &str) -> Result<DispatchConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    let config: DispatchConfig = serde_yaml::from_str(&substituted)
        .with_context(|| "Failed to parse YAML configuration")?;

    info!(service = %config.service.name, "Configuration loaded successfully");
    Ok(config)
}

/// Configuration written by `init`: defaults plus a small seeded fleet so a
/// local instance can match rides without a database.
#[instrument]
pub fn generate_default_config() -> DispatchConfig {
    let mut config = DispatchConfig::default();
    config.logging.level = Some(default_log_level());
    config.store.seed_drivers = vec![
        SeedDriver {
            id: "driver-001".to_string(),
            vehicle_type: "ECONOMY".to_string(),
            rating: 4.9,
            status: default_seed_status(),
            latitude: 43.2389,
            longitude: 76.8897,
        },
        SeedDriver {
            id: "driver-002".to_string(),
            vehicle_type: "ECONOMY".to_string(),
            rating: 4.7,
            status: default_seed_status(),
            latitude: 43.2450,
            longitude: 76.9000,
        },
        SeedDriver {
            id: "driver-003".to_string(),
            vehicle_type: "PREMIUM".to_string(),
            rating: 5.0,
            status: default_seed_status(),
            latitude: 43.2300,
            longitude: 76.8800,
        },
    ];
    config
}

#[instrument(skip(config))]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &DispatchConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml).with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_config_is_valid_and_reparses() {
        let config = generate_default_config();
        let report = validate_config(&config);
        assert!(report.is_valid(), "{:?}", report.errors);

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = parse_config(&yaml).unwrap();
        assert_eq!(parsed.store.seed_drivers.len(), 3);
        assert_eq!(parsed.service.http_port, config.service.http_port);
    }

    #[test]
    fn test_save_and_load_round_trip_on_disk() {
        let path = std::env::temp_dir().join(format!(
            "dispatch-config-{}.yaml",
            std::process::id()
        ));
        let config = generate_default_config();
        save_config(&config, &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.matching.offer_window_seconds, 30);
        assert_eq!(loaded.store.seed_drivers[2].vehicle_type, "PREMIUM");

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let err = load_config("/nonexistent/dispatch.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
