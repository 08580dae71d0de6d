//! PostgreSQL logical replication setup.
//!
//! The webapp streams `TaskRun` changes to ClickHouse through a logical
//! replication publication. That needs three things on the database:
//! `wal_level = logical` (takes effect after a restart), `REPLICA IDENTITY
//! FULL` on the table, and the publication itself.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;

use crate::controller::ReplicationManager;
use crate::error::AppError;
use crate::types::ReplicationStatus;

pub const DEFAULT_TABLE: &str = "TaskRun";
pub const DEFAULT_PUBLICATION: &str = "task_runs_to_clickhouse_v1_publication";

/// Result of applying the replication settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// `ALTER SYSTEM SET wal_level` was issued; the server must restart.
    pub restart_required: bool,
}

/// Quote an identifier for interpolation into DDL.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Human name for a `pg_class.relreplident` code.
pub fn replica_identity_name(code: &str) -> &'static str {
    match code {
        "d" => "default",
        "n" => "nothing",
        "f" => "full",
        "i" => "index",
        _ => "unknown",
    }
}

/// Issues preventing logical replication, given the three observed values.
pub fn replication_issues(wal_level: &str, replica_identity: &str, publication_exists: bool) -> Vec<String> {
    let mut issues = Vec::new();
    if wal_level != "logical" {
        issues.push(format!("WAL level is '{}', needs to be 'logical'", wal_level));
    }
    if replica_identity != "full" {
        issues.push(format!(
            "Replica identity is '{}', needs to be 'full'",
            replica_identity
        ));
    }
    if !publication_exists {
        issues.push("Publication does not exist".to_string());
    }
    issues
}

pub struct PostgresConfigurator {
    pool: PgPool,
    table: String,
    publication: String,
}

impl PostgresConfigurator {
    /// Build a lazily-connecting configurator; nothing is dialled until the
    /// first query.
    pub fn connect_lazy(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect_lazy(database_url)?;

        Ok(Self::with_pool(pool))
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            pool,
            table: DEFAULT_TABLE.to_string(),
            publication: DEFAULT_PUBLICATION.to_string(),
        }
    }

    pub async fn wal_level(&self) -> Result<String, AppError> {
        let level: String = sqlx::query_scalar("SHOW wal_level")
            .fetch_one(&self.pool)
            .await?;
        Ok(level)
    }

    /// Requires superuser. Managed databases may reject it.
    pub async fn set_wal_level_logical(&self) -> Result<(), AppError> {
        // ALTER SYSTEM cannot run in a transaction block: use the simple protocol.
        self.pool
            .execute("ALTER SYSTEM SET wal_level = 'logical'")
            .await?;
        tracing::info!("Set WAL level to logical (restart required)");
        Ok(())
    }

    /// `default`, `nothing`, `full`, `index`, or `not_found` when the table
    /// does not exist in `public`.
    pub async fn replica_identity(&self) -> Result<String, AppError> {
        let code: Option<String> = sqlx::query_scalar(
            "SELECT relreplident::text
             FROM pg_class
             WHERE relname = $1
               AND relnamespace = (SELECT oid FROM pg_namespace WHERE nspname = 'public')",
        )
        .bind(&self.table)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match code {
            Some(code) => replica_identity_name(&code).to_string(),
            None => "not_found".to_string(),
        })
    }

    pub async fn set_replica_identity_full(&self) -> Result<(), AppError> {
        let statement = format!(
            "ALTER TABLE public.{} REPLICA IDENTITY FULL",
            quote_ident(&self.table)
        );
        self.pool.execute(statement.as_str()).await?;
        tracing::info!("Set replica identity FULL for table: {}", self.table);
        Ok(())
    }

    pub async fn publication_exists(&self) -> Result<bool, AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_publication WHERE pubname = $1)")
                .bind(&self.publication)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Create the publication; an existing one counts as success.
    pub async fn create_publication(&self) -> Result<(), AppError> {
        let statement = format!(
            "CREATE PUBLICATION {} FOR TABLE public.{}",
            quote_ident(&self.publication),
            quote_ident(&self.table)
        );

        match self.pool.execute(statement.as_str()).await {
            Ok(_) => {
                tracing::info!("Created publication: {}", self.publication);
                Ok(())
            }
            Err(err) if err.to_string().contains("already exists") => {
                tracing::info!("Publication already exists: {}", self.publication);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn status(&self) -> Result<ReplicationStatus, AppError> {
        let wal_level = self.wal_level().await?;
        let replica_identity = self.replica_identity().await?;
        let publication_exists = self.publication_exists().await?;
        let issues = replication_issues(&wal_level, &replica_identity, publication_exists);

        Ok(ReplicationStatus {
            wal_level,
            replica_identity,
            publication_exists,
            issues,
        })
    }

    /// Apply whichever of the three settings are missing, in order,
    /// stopping at the first failure.
    pub async fn apply(&self) -> Result<ApplyOutcome, AppError> {
        apply_steps(self).await
    }

    /// Log each check and return whether replication is ready.
    pub async fn verify(&self) -> Result<bool, AppError> {
        tracing::info!("Verifying PostgreSQL configuration");
        let status = self.status().await?;

        let mark = |ok: bool| if ok { "ok" } else { "MISSING" };
        tracing::info!("  WAL level: {} [{}]", status.wal_level, mark(status.wal_level == "logical"));
        tracing::info!(
            "  Replica identity: {} [{}]",
            status.replica_identity,
            mark(status.replica_identity == "full")
        );
        tracing::info!("  Publication exists: [{}]", mark(status.publication_exists));
        tracing::info!("  Overall: {}", status.summary());

        Ok(status.is_configured())
    }
}

/// The individual reads and writes `apply` is built from.
#[async_trait]
trait ReplicationSteps: Send + Sync {
    async fn wal_level(&self) -> Result<String, AppError>;
    async fn set_wal_level_logical(&self) -> Result<(), AppError>;
    async fn replica_identity(&self) -> Result<String, AppError>;
    async fn set_replica_identity_full(&self) -> Result<(), AppError>;
    async fn publication_exists(&self) -> Result<bool, AppError>;
    async fn create_publication(&self) -> Result<(), AppError>;
}

#[async_trait]
impl ReplicationSteps for PostgresConfigurator {
    async fn wal_level(&self) -> Result<String, AppError> {
        PostgresConfigurator::wal_level(self).await
    }

    async fn set_wal_level_logical(&self) -> Result<(), AppError> {
        PostgresConfigurator::set_wal_level_logical(self).await
    }

    async fn replica_identity(&self) -> Result<String, AppError> {
        PostgresConfigurator::replica_identity(self).await
    }

    async fn set_replica_identity_full(&self) -> Result<(), AppError> {
        PostgresConfigurator::set_replica_identity_full(self).await
    }

    async fn publication_exists(&self) -> Result<bool, AppError> {
        PostgresConfigurator::publication_exists(self).await
    }

    async fn create_publication(&self) -> Result<(), AppError> {
        PostgresConfigurator::create_publication(self).await
    }
}

async fn apply_steps(steps: &dyn ReplicationSteps) -> Result<ApplyOutcome, AppError> {
    tracing::info!("Configuring PostgreSQL for logical replication");

    let wal_level = steps.wal_level().await?;
    tracing::info!("Current WAL level: {}", wal_level);

    let mut restart_required = false;
    if wal_level != "logical" {
        steps.set_wal_level_logical().await.map_err(|err| {
            tracing::warn!("Could not set WAL level automatically; managed databases may need manual configuration");
            err
        })?;
        restart_required = true;
    }

    let replica_identity = steps.replica_identity().await?;
    tracing::info!("Current replica identity: {}", replica_identity);
    if replica_identity != "full" {
        steps.set_replica_identity_full().await?;
    }

    if !steps.publication_exists().await? {
        steps.create_publication().await?;
    }

    Ok(ApplyOutcome { restart_required })
}

#[async_trait]
impl ReplicationManager for PostgresConfigurator {
    async fn replication_status(&self) -> Result<ReplicationStatus, AppError> {
        self.status().await
    }

    async fn apply_replication(&self) -> Result<ApplyOutcome, AppError> {
        self.apply().await
    }
}
