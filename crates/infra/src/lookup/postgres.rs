//! Postgres-backed lookup history (`geoip_records`).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use geoip_core::{GeoRecord, RecordId};

use super::records::{GeoRecordStore, RecordStoreError};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS geoip_records (
        id            UUID             PRIMARY KEY,
        ip_address    VARCHAR(45)      NOT NULL,
        country_code  VARCHAR(8)       NOT NULL,
        country_name  VARCHAR(100)     NOT NULL,
        region        VARCHAR(100)     NOT NULL,
        city          VARCHAR(100)     NOT NULL,
        latitude      DOUBLE PRECISION NOT NULL,
        longitude     DOUBLE PRECISION NOT NULL,
        timezone      VARCHAR(64)      NOT NULL,
        created_at    TIMESTAMPTZ      NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_geoip_records_ip ON geoip_records (ip_address)",
    "CREATE INDEX IF NOT EXISTS idx_geoip_records_created_at ON geoip_records (created_at DESC)",
];

const COLUMNS: &str = "id, ip_address, country_code, country_name, region, city, latitude, \
     longitude, timezone, created_at";

#[derive(Debug, Clone)]
pub struct PostgresGeoRecordStore {
    pool: Arc<PgPool>,
}

impl PostgresGeoRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn ensure_schema(&self) -> Result<(), RecordStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl GeoRecordStore for PostgresGeoRecordStore {
    #[instrument(skip(self, record), fields(ip = %record.ip_address), err)]
    async fn insert(&self, record: &GeoRecord) -> Result<(), RecordStoreError> {
        sqlx::query(&format!(
            "INSERT INTO geoip_records ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(record.id.as_uuid())
        .bind(&record.ip_address)
        .bind(&record.country_code)
        .bind(&record.country_name)
        .bind(&record.region)
        .bind(&record.city)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(&record.timezone)
        .bind(record.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;
        Ok(())
    }

    async fn get(&self, id: RecordId) -> Result<Option<GeoRecord>, RecordStoreError> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM geoip_records WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.map(|r| decode(&r)).transpose()
    }

    async fn find_latest_by_ip(&self, ip: &str) -> Result<Option<GeoRecord>, RecordStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM geoip_records WHERE ip_address = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(ip)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_latest_by_ip", e))?;
        row.map(|r| decode(&r)).transpose()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<GeoRecord>, RecordStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM geoip_records ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit as i64)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("recent", e))?;
        rows.iter().map(decode).collect()
    }
}

fn decode(row: &sqlx::postgres::PgRow) -> Result<GeoRecord, RecordStoreError> {
    GeoRecordRow::from_row(row)
        .map(Into::into)
        .map_err(|e| RecordStoreError::Storage(format!("failed to decode record row: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RecordStoreError {
    match err {
        sqlx::Error::Database(db_err) => RecordStoreError::Storage(format!(
            "database error in {operation}: {}",
            db_err.message()
        )),
        sqlx::Error::PoolClosed => {
            RecordStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => RecordStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

#[derive(Debug)]
struct GeoRecordRow {
    id: uuid::Uuid,
    ip_address: String,
    country_code: String,
    country_name: String,
    region: String,
    city: String,
    latitude: f64,
    longitude: f64,
    timezone: String,
    created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for GeoRecordRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(GeoRecordRow {
            id: row.try_get("id")?,
            ip_address: row.try_get("ip_address")?,
            country_code: row.try_get("country_code")?,
            country_name: row.try_get("country_name")?,
            region: row.try_get("region")?,
            city: row.try_get("city")?,
            latitude: row.try_get("latitude")?,
            longitude: row.try_get("longitude")?,
            timezone: row.try_get("timezone")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<GeoRecordRow> for GeoRecord {
    fn from(row: GeoRecordRow) -> Self {
        GeoRecord {
            id: RecordId::from_uuid(row.id),
            ip_address: row.ip_address,
            country_code: row.country_code,
            country_name: row.country_name,
            region: row.region,
            city: row.city,
            latitude: row.latitude,
            longitude: row.longitude,
            timezone: row.timezone,
            is_from_cache: false,
            created_at: row.created_at,
        }
    }
}
