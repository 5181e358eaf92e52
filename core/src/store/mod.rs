//! Embedded transactional stores, one module per resource kind.
//!
//! Records are rows keyed by the primary keys of the data model; every
//! complex nested field is a UTF-8 JSON blob column that storage never
//! inspects. One writer at a time per record is provided by the single
//! SQLite connection behind an async mutex.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use rusqlite::Connection;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{EcsError, Result};

pub mod clusters;
pub mod services;
pub mod tags;
pub mod task_definitions;
pub mod task_sets;
pub mod tasks;

mod page;

pub use page::{clamp_max_results, decode_token, encode_token};

#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (or create) the state database at `path` and initialize the
    /// schema.
    pub fn open(path: &Path) -> Result<Db> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create data dir {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open state database {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("failed to enable foreign keys")?;
        let db = Db {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema_blocking()?;
        tracing::info!(path = %path.display(), "state database opened");
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Db> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        let db = Db {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema_blocking()?;
        Ok(db)
    }

    pub(crate) async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }

    fn init_schema_blocking(&self) -> Result<()> {
        let conn = self.conn.try_lock().expect("fresh connection is unlocked");
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS clusters (
                name TEXT PRIMARY KEY,
                arn TEXT UNIQUE NOT NULL,
                status TEXT NOT NULL,
                region TEXT NOT NULL,
                account_id TEXT NOT NULL,
                k8s_cluster_name TEXT NOT NULL,
                registered_container_instances_count INTEGER NOT NULL DEFAULT 0,
                running_tasks_count INTEGER NOT NULL DEFAULT 0,
                pending_tasks_count INTEGER NOT NULL DEFAULT 0,
                active_services_count INTEGER NOT NULL DEFAULT 0,
                settings TEXT,
                configuration TEXT,
                tags TEXT,
                capacity_providers TEXT,
                default_capacity_provider_strategy TEXT,
                localstack_state TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS task_definitions (
                family TEXT NOT NULL,
                revision INTEGER NOT NULL,
                arn TEXT UNIQUE NOT NULL,
                status TEXT NOT NULL,
                container_definitions TEXT NOT NULL,
                volumes TEXT,
                placement_constraints TEXT,
                proxy_configuration TEXT,
                runtime_platform TEXT,
                inference_accelerators TEXT,
                requires_compatibilities TEXT,
                network_mode TEXT,
                cpu TEXT,
                memory TEXT,
                task_role_arn TEXT,
                execution_role_arn TEXT,
                pid_mode TEXT,
                ipc_mode TEXT,
                tags TEXT,
                registered_at INTEGER NOT NULL,
                deregistered_at INTEGER,
                PRIMARY KEY (family, revision)
            );

            CREATE TABLE IF NOT EXISTS services (
                arn TEXT PRIMARY KEY,
                service_name TEXT NOT NULL,
                cluster_arn TEXT NOT NULL,
                task_definition_arn TEXT NOT NULL,
                desired_count INTEGER NOT NULL DEFAULT 0,
                running_count INTEGER NOT NULL DEFAULT 0,
                pending_count INTEGER NOT NULL DEFAULT 0,
                launch_type TEXT NOT NULL,
                platform_version TEXT,
                status TEXT NOT NULL,
                scheduling_strategy TEXT NOT NULL,
                deployment_configuration TEXT,
                deployments TEXT,
                network_configuration TEXT,
                placement_constraints TEXT,
                placement_strategy TEXT,
                capacity_provider_strategy TEXT,
                load_balancers TEXT,
                service_registries TEXT,
                service_connect_configuration TEXT,
                tags TEXT,
                role_arn TEXT,
                enable_ecs_managed_tags INTEGER NOT NULL DEFAULT 0,
                propagate_tags TEXT,
                enable_execute_command INTEGER NOT NULL DEFAULT 0,
                health_check_grace_period_seconds INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (cluster_arn, service_name)
            );
            CREATE INDEX IF NOT EXISTS idx_services_cluster ON services (cluster_arn);

            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                arn TEXT UNIQUE NOT NULL,
                cluster_arn TEXT NOT NULL,
                task_definition_arn TEXT NOT NULL,
                container_instance_arn TEXT,
                overrides TEXT,
                last_status TEXT NOT NULL,
                desired_status TEXT NOT NULL,
                cpu TEXT,
                memory TEXT,
                containers TEXT,
                started_by TEXT,
                version INTEGER NOT NULL DEFAULT 1,
                stop_code TEXT,
                stopped_reason TEXT,
                connectivity TEXT,
                connectivity_at INTEGER,
                pull_started_at INTEGER,
                pull_stopped_at INTEGER,
                started_at INTEGER,
                stopping_at INTEGER,
                stopped_at INTEGER,
                execution_stopped_at INTEGER,
                launch_type TEXT NOT NULL,
                platform_version TEXT,
                task_group TEXT,
                attachments TEXT,
                attributes TEXT,
                tags TEXT,
                health_status TEXT,
                enable_execute_command INTEGER NOT NULL DEFAULT 0,
                capacity_provider_name TEXT,
                pod_name TEXT,
                namespace TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_cluster ON tasks (cluster_arn);

            CREATE TABLE IF NOT EXISTS task_sets (
                id TEXT NOT NULL,
                service_arn TEXT NOT NULL,
                arn TEXT UNIQUE NOT NULL,
                cluster_arn TEXT NOT NULL,
                external_id TEXT,
                task_definition TEXT NOT NULL,
                launch_type TEXT,
                platform_version TEXT,
                scale_value REAL NOT NULL,
                scale_unit TEXT NOT NULL,
                status TEXT NOT NULL,
                stability_status TEXT NOT NULL,
                computed_desired_count INTEGER NOT NULL DEFAULT 0,
                running_count INTEGER NOT NULL DEFAULT 0,
                pending_count INTEGER NOT NULL DEFAULT 0,
                network_configuration TEXT,
                load_balancers TEXT,
                service_registries TEXT,
                capacity_provider_strategy TEXT,
                tags TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                stability_status_at INTEGER NOT NULL,
                PRIMARY KEY (service_arn, id)
            );

            CREATE TABLE IF NOT EXISTS resource_tags (
                resource_arn TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (resource_arn, key)
            );
            "#,
        )
        .context("failed to initialize schema")?;
        Ok(())
    }
}


/// Map an insert failure: uniqueness violations become `AlreadyExists`,
/// everything else is internal.
pub(crate) fn insert_error(err: rusqlite::Error, what: &str, key: &str) -> EcsError {
    match err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            EcsError::AlreadyExists(format!("{what} '{key}' already exists"))
        }
        other => EcsError::Internal(
            anyhow::Error::new(other).context(format!("failed to insert {what} '{key}'")),
        ),
    }
}
