//! PostgreSQL persistence backend.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use super::{PersistenceSink, SinkError};
use crate::models::{NodeRecord, OwnerRecord, OwnerRef, PodRecord, ServiceRecord};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS pods (
        id BIGSERIAL PRIMARY KEY,
        pod_name TEXT NOT NULL,
        namespace TEXT NOT NULL,
        record_time TIMESTAMPTZ NOT NULL,
        node_name TEXT NOT NULL,
        own_uid TEXT NOT NULL,
        owner_version TEXT NOT NULL DEFAULT '',
        owner_kind TEXT NOT NULL DEFAULT '',
        owner_name TEXT NOT NULL DEFAULT '',
        owner_uid TEXT NOT NULL DEFAULT '',
        labels TEXT NOT NULL DEFAULT '',
        app_name TEXT NOT NULL DEFAULT '',
        app_instance TEXT NOT NULL DEFAULT '',
        app_version TEXT NOT NULL DEFAULT '',
        app_component TEXT NOT NULL DEFAULT '',
        app_part_of TEXT NOT NULL DEFAULT '',
        app_managed_by TEXT NOT NULL DEFAULT '',
        cpu_milli BIGINT NOT NULL,
        memory_bytes BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS nodes (
        id BIGSERIAL PRIMARY KEY,
        node_name TEXT NOT NULL,
        record_time TIMESTAMPTZ NOT NULL,
        created_at TIMESTAMPTZ,
        uid TEXT NOT NULL,
        memory_bytes BIGINT NOT NULL,
        cpu_cores BIGINT NOT NULL,
        labels TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS owners (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        namespace TEXT NOT NULL,
        record_time TIMESTAMPTZ NOT NULL,
        own_version TEXT NOT NULL,
        own_kind TEXT NOT NULL,
        own_uid TEXT NOT NULL,
        owner_version TEXT NOT NULL DEFAULT '',
        owner_kind TEXT NOT NULL DEFAULT '',
        owner_name TEXT NOT NULL DEFAULT '',
        owner_uid TEXT NOT NULL DEFAULT '',
        labels TEXT NOT NULL DEFAULT ''
    )",
    "CREATE TABLE IF NOT EXISTS services (
        id BIGSERIAL PRIMARY KEY,
        service_name TEXT NOT NULL,
        namespace TEXT NOT NULL,
        record_time TIMESTAMPTZ NOT NULL,
        uid TEXT NOT NULL,
        app_label TEXT NOT NULL DEFAULT '',
        labels TEXT NOT NULL DEFAULT '',
        selector TEXT NOT NULL DEFAULT ''
    )",
];

/// Persistence sink over a PostgreSQL connection pool.
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self::new(pool))
    }

    /// Creates the record tables if they do not exist yet. Idempotent.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("applying schema")?;
        }
        Ok(())
    }
}

fn owner_columns(owner: &Option<OwnerRef>) -> OwnerRef {
    owner.clone().unwrap_or_default()
}

#[async_trait]
impl PersistenceSink for PostgresSink {
    async fn insert_pod(&self, record: &PodRecord) -> Result<(), SinkError> {
        let owner = owner_columns(&record.owner);
        sqlx::query(
            "INSERT INTO pods (pod_name, namespace, record_time, node_name, own_uid, \
             owner_version, owner_kind, owner_name, owner_uid, labels, \
             app_name, app_instance, app_version, app_component, app_part_of, app_managed_by, \
             cpu_milli, memory_bytes) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)",
        )
        .bind(&record.name)
        .bind(&record.namespace)
        .bind(record.record_time)
        .bind(&record.node_name)
        .bind(&record.own_uid)
        .bind(&owner.api_version)
        .bind(&owner.kind)
        .bind(&owner.name)
        .bind(&owner.uid)
        .bind(&record.labels)
        .bind(&record.app.name)
        .bind(&record.app.instance)
        .bind(&record.app.version)
        .bind(&record.app.component)
        .bind(&record.app.part_of)
        .bind(&record.app.managed_by)
        .bind(record.usage.cpu_milli)
        .bind(record.usage.memory_bytes)
        .execute(&self.pool)
        .await
        .map_err(|err| SinkError(err.into()))?;
        Ok(())
    }

    async fn insert_node(&self, record: &NodeRecord) -> Result<(), SinkError> {
        sqlx::query(
            "INSERT INTO nodes (node_name, record_time, created_at, uid, memory_bytes, cpu_cores, labels) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&record.name)
        .bind(record.record_time)
        .bind(record.created_at)
        .bind(&record.uid)
        .bind(record.memory_bytes)
        .bind(record.cpu_cores)
        .bind(&record.labels)
        .execute(&self.pool)
        .await
        .map_err(|err| SinkError(err.into()))?;
        Ok(())
    }

    async fn insert_owner(&self, record: &OwnerRecord) -> Result<(), SinkError> {
        let owner = owner_columns(&record.owner);
        sqlx::query(
            "INSERT INTO owners (name, namespace, record_time, own_version, own_kind, own_uid, \
             owner_version, owner_kind, owner_name, owner_uid, labels) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(&record.name)
        .bind(&record.namespace)
        .bind(record.record_time)
        .bind(&record.own_version)
        .bind(record.own_kind.as_str())
        .bind(&record.own_uid)
        .bind(&owner.api_version)
        .bind(&owner.kind)
        .bind(&owner.name)
        .bind(&owner.uid)
        .bind(&record.labels)
        .execute(&self.pool)
        .await
        .map_err(|err| SinkError(err.into()))?;
        Ok(())
    }

    async fn insert_service(&self, record: &ServiceRecord) -> Result<(), SinkError> {
        sqlx::query(
            "INSERT INTO services (service_name, namespace, record_time, uid, app_label, labels, selector) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&record.name)
        .bind(&record.namespace)
        .bind(record.record_time)
        .bind(&record.uid)
        .bind(&record.app_label)
        .bind(&record.labels)
        .bind(&record.selector)
        .execute(&self.pool)
        .await
        .map_err(|err| SinkError(err.into()))?;
        Ok(())
    }
}
