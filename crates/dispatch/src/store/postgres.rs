//! PostgreSQL driver store
//!
//! Expects the ride platform schema: a `drivers` table and a `coordinates`
//! table holding one `is_current` row per driver. Proximity search needs the
//! PostGIS extension. Numeric columns are read as `float8`.

use async_trait::async_trait;
use common::{DriverId, DriverStatus, GeoPoint, VehicleType};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::time::Duration;
use tracing::info;

use crate::domain::{Driver, NearbyDriver};
use crate::store::traits::{DriverStore, NearbyQuery, StatusCas, StoreError, StoreResult};

const FIND_AVAILABLE_NEAR: &str = r#"
    SELECT d.id, d.vehicle_type, d.rating::float8 AS rating,
           c.latitude::float8 AS latitude, c.longitude::float8 AS longitude,
           ST_Distance(
               ST_MakePoint(c.longitude, c.latitude)::geography,
               ST_MakePoint($2, $1)::geography
           ) AS distance_m
    FROM drivers d
    JOIN coordinates c ON c.entity_id = d.id
        AND c.entity_type = 'driver'
        AND c.is_current = true
    WHERE d.status = 'AVAILABLE'
        AND ($3::text IS NULL OR d.vehicle_type = $3)
        AND ST_DWithin(
            ST_MakePoint(c.longitude, c.latitude)::geography,
            ST_MakePoint($2, $1)::geography,
            $4
        )
    ORDER BY distance_m ASC, d.rating DESC
    LIMIT $5
"#;

const GET_DRIVER: &str = r#"
    SELECT d.id, d.vehicle_type, d.rating::float8 AS rating, d.status,
           c.latitude::float8 AS latitude, c.longitude::float8 AS longitude
    FROM drivers d
    LEFT JOIN coordinates c ON c.entity_id = d.id
        AND c.entity_type = 'driver'
        AND c.is_current = true
    WHERE d.id = $1
"#;

pub struct PostgresDriverStore {
    pool: PgPool,
}

impl PostgresDriverStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &config::PostgresConfig) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect(&config.connection_url())
            .await
            .map_err(db_error)?;

        info!(host = %config.host, database = %config.database, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    async fn current_status(&self, driver_id: &DriverId) -> StoreResult<Option<DriverStatus>> {
        let row = sqlx::query("SELECT status FROM drivers WHERE id = $1")
            .bind(driver_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|r| parse_status(r.try_get("status").map_err(db_error)?))
            .transpose()
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse_status(value: String) -> StoreResult<DriverStatus> {
    value
        .parse()
        .map_err(|e: common::Error| StoreError::InvalidData(e.to_string()))
}

fn parse_vehicle_type(value: String) -> StoreResult<VehicleType> {
    value
        .parse()
        .map_err(|e: common::Error| StoreError::InvalidData(e.to_string()))
}

fn row_to_nearby(row: &PgRow) -> StoreResult<NearbyDriver> {
    let distance_m: f64 = row.try_get("distance_m").map_err(db_error)?;
    Ok(NearbyDriver {
        driver_id: DriverId::new(row.try_get::<String, _>("id").map_err(db_error)?),
        vehicle_type: parse_vehicle_type(row.try_get("vehicle_type").map_err(db_error)?)?,
        rating: row.try_get("rating").map_err(db_error)?,
        location: GeoPoint {
            latitude: row.try_get("latitude").map_err(db_error)?,
            longitude: row.try_get("longitude").map_err(db_error)?,
        },
        distance_km: distance_m / 1000.0,
    })
}

#[async_trait]
impl DriverStore for PostgresDriverStore {
    async fn find_available_near(&self, query: &NearbyQuery) -> StoreResult<Vec<NearbyDriver>> {
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(FIND_AVAILABLE_NEAR)
            .bind(query.center.latitude)
            .bind(query.center.longitude)
            .bind(query.vehicle_type.map(|vt| vt.as_str()))
            .bind(query.radius_meters)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(row_to_nearby).collect()
    }

    async fn get_driver(&self, driver_id: &DriverId) -> StoreResult<Option<Driver>> {
        let row = sqlx::query(GET_DRIVER)
            .bind(driver_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let latitude: Option<f64> = row.try_get("latitude").map_err(db_error)?;
        let longitude: Option<f64> = row.try_get("longitude").map_err(db_error)?;
        Ok(Some(Driver {
            id: driver_id.clone(),
            vehicle_type: parse_vehicle_type(row.try_get("vehicle_type").map_err(db_error)?)?,
            rating: row.try_get("rating").map_err(db_error)?,
            status: parse_status(row.try_get("status").map_err(db_error)?)?,
            location: latitude
                .zip(longitude)
                .map(|(latitude, longitude)| GeoPoint {
                    latitude,
                    longitude,
                }),
        }))
    }

    async fn compare_and_set_status(
        &self,
        driver_id: &DriverId,
        expected: DriverStatus,
        new: DriverStatus,
    ) -> StoreResult<StatusCas> {
        let result = sqlx::query(
            "UPDATE drivers SET status = $1, updated_at = now() WHERE id = $2 AND status = $3",
        )
        .bind(new.as_str())
        .bind(driver_id.as_str())
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() > 0 {
            return Ok(StatusCas::Applied);
        }

        Ok(match self.current_status(driver_id).await? {
            Some(actual) => StatusCas::Mismatch(actual),
            None => StatusCas::NotFound,
        })
    }

    async fn record_location(&self, driver_id: &DriverId, point: GeoPoint) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        sqlx::query(
            "UPDATE coordinates SET is_current = false, updated_at = now() \
             WHERE entity_id = $1 AND entity_type = 'driver' AND is_current = true",
        )
        .bind(driver_id.as_str())
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        sqlx::query(
            "INSERT INTO coordinates (id, entity_id, entity_type, latitude, longitude, is_current) \
             VALUES (gen_random_uuid(), $1, 'driver', $2, $3, true)",
        )
        .bind(driver_id.as_str())
        .bind(point.latitude)
        .bind(point.longitude)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(db_error)
    }
}
