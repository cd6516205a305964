//! Driver storage
//!
//! The engine only talks to [`DriverStore`]. `memory` is always available;
//! `postgres` needs the feature of the same name.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod traits;

pub use memory::InMemoryDriverStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDriverStore;
pub use traits::*;

use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Store type selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreType {
    InMemory,
    Postgres,
}

impl StoreType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inmemory" | "in_memory" | "memory" => Some(StoreType::InMemory),
            "postgres" | "postgresql" => Some(StoreType::Postgres),
            _ => None,
        }
    }
}

impl FromStr for StoreType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| StoreError::Other(format!("unknown store type '{}'", s)))
    }
}

/// Create the configured store
///
/// The memory store is filled from `seed_drivers`.
pub async fn create_store(config: &config::StoreConfig) -> StoreResult<Arc<dyn DriverStore>> {
    match config.store_type.parse::<StoreType>()? {
        StoreType::InMemory => {
            let store = InMemoryDriverStore::from_seed(&config.seed_drivers)?;
            info!(drivers = store.len(), "Created in-memory driver store");
            Ok(Arc::new(store))
        }
        StoreType::Postgres => create_postgres_store(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn create_postgres_store(config: &config::StoreConfig) -> StoreResult<Arc<dyn DriverStore>> {
    let pg = config
        .postgres
        .as_ref()
        .ok_or_else(|| StoreError::Other("postgres section required for postgres store".into()))?;
    let store = PostgresDriverStore::connect(pg).await?;
    info!("Created PostgreSQL driver store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn create_postgres_store(_config: &config::StoreConfig) -> StoreResult<Arc<dyn DriverStore>> {
    Err(StoreError::Other(
        "postgres store requested but dispatch was built without the `postgres` feature".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_type_parse() {
        assert_eq!(StoreType::parse("memory"), Some(StoreType::InMemory));
        assert_eq!(StoreType::parse("IN_MEMORY"), Some(StoreType::InMemory));
        assert_eq!(StoreType::parse("postgresql"), Some(StoreType::Postgres));
        assert_eq!(StoreType::parse("redis"), None);
        assert!("redis".parse::<StoreType>().is_err());
    }

    #[tokio::test]
    async fn test_create_memory_store_from_seed() {
        let config = config::StoreConfig {
            store_type: "memory".to_string(),
            postgres: None,
            seed_drivers: vec![config::SeedDriver {
                id: "driver-001".to_string(),
                vehicle_type: "ECONOMY".to_string(),
                rating: 4.9,
                status: "AVAILABLE".to_string(),
                latitude: 43.2,
                longitude: 76.9,
            }],
        };
        let store = create_store(&config).await.unwrap();
        let driver = store
            .get_driver(&common::DriverId::new("driver-001"))
            .await
            .unwrap();
        assert!(driver.is_some());
    }

    #[tokio::test]
    async fn test_unknown_store_type_fails() {
        let config = config::StoreConfig {
            store_type: "cassandra".to_string(),
            postgres: None,
            seed_drivers: Vec::new(),
        };
        assert!(create_store(&config).await.is_err());
    }
}
