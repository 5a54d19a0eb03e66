//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::Database;

/// Statements of migration v1: one parent table per item kind plus child tables
///
/// Child rows keep their upstream order through `position` and disappear with
/// their parent.
const SCHEMA_V1: &[(&str, &str)] = &[
    (
        "cpe_match_strings",
        r#"
        CREATE TABLE cpe_match_strings (
            match_criteria_id BLOB PRIMARY KEY,
            criteria TEXT NOT NULL,
            status TEXT NOT NULL,
            cpe_last_modified TEXT,
            created TEXT NOT NULL,
            last_modified TEXT NOT NULL,
            version_start_including TEXT,
            version_start_excluding TEXT,
            version_end_including TEXT,
            version_end_excluding TEXT
        )
        "#,
    ),
    (
        "cpe_match_string_matches",
        r#"
        CREATE TABLE cpe_match_string_matches (
            match_criteria_id BLOB NOT NULL
                REFERENCES cpe_match_strings(match_criteria_id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            cpe_name TEXT NOT NULL,
            cpe_name_id BLOB NOT NULL,
            PRIMARY KEY (match_criteria_id, position)
        )
        "#,
    ),
    (
        "cpes",
        r#"
        CREATE TABLE cpes (
            cpe_name_id BLOB PRIMARY KEY,
            cpe_name TEXT NOT NULL,
            deprecated INTEGER NOT NULL DEFAULT 0,
            created TEXT NOT NULL,
            last_modified TEXT NOT NULL
        )
        "#,
    ),
    (
        "cpe_titles",
        r#"
        CREATE TABLE cpe_titles (
            cpe_name_id BLOB NOT NULL REFERENCES cpes(cpe_name_id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            title TEXT NOT NULL,
            lang TEXT NOT NULL,
            PRIMARY KEY (cpe_name_id, position)
        )
        "#,
    ),
    (
        "cpe_refs",
        r#"
        CREATE TABLE cpe_refs (
            cpe_name_id BLOB NOT NULL REFERENCES cpes(cpe_name_id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            ref TEXT NOT NULL,
            ref_type TEXT,
            PRIMARY KEY (cpe_name_id, position)
        )
        "#,
    ),
    (
        "cves",
        r#"
        CREATE TABLE cves (
            id TEXT PRIMARY KEY,
            source_identifier TEXT NOT NULL,
            published TEXT NOT NULL,
            last_modified TEXT NOT NULL,
            vuln_status TEXT NOT NULL
        )
        "#,
    ),
    (
        "cve_descriptions",
        r#"
        CREATE TABLE cve_descriptions (
            cve_id TEXT NOT NULL REFERENCES cves(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            lang TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (cve_id, position)
        )
        "#,
    ),
    (
        "cve_references",
        r#"
        CREATE TABLE cve_references (
            cve_id TEXT NOT NULL REFERENCES cves(id) ON DELETE CASCADE,
            position INTEGER NOT NULL,
            url TEXT NOT NULL,
            source TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (cve_id, position)
        )
        "#,
    ),
];

/// Migration v2: indexes for the time-window filters used by the database producer
const SCHEMA_V2: &[(&str, &str)] = &[
    (
        "idx_cpe_match_strings_last_modified",
        "CREATE INDEX idx_cpe_match_strings_last_modified ON cpe_match_strings(last_modified)",
    ),
    (
        "idx_cpes_last_modified",
        "CREATE INDEX idx_cpes_last_modified ON cpes(last_modified)",
    ),
    (
        "idx_cves_last_modified",
        "CREATE INDEX idx_cves_last_modified ON cves(last_modified)",
    ),
    (
        "idx_cves_published",
        "CREATE INDEX idx_cves_published ON cves(published)",
    ),
];

/// Migration v3: searchable CPE name components
///
/// `version_key` holds [`version_key`](super::version_key) of the version
/// component and is NULL when the version has no numeric release part.
const SCHEMA_V3: &[(&str, &str)] = &[
    (
        "cpe_name_parts",
        r#"
        CREATE TABLE cpe_name_parts (
            cpe_name_id BLOB PRIMARY KEY REFERENCES cpes(cpe_name_id) ON DELETE CASCADE,
            part TEXT NOT NULL,
            vendor TEXT NOT NULL,
            product TEXT NOT NULL,
            version TEXT NOT NULL,
            "update" TEXT NOT NULL,
            edition TEXT NOT NULL,
            language TEXT NOT NULL,
            sw_edition TEXT NOT NULL,
            target_sw TEXT NOT NULL,
            target_hw TEXT NOT NULL,
            other TEXT NOT NULL,
            version_key TEXT
        )
        "#,
    ),
    (
        "idx_cpe_name_parts_product",
        "CREATE INDEX idx_cpe_name_parts_product ON cpe_name_parts(vendor, product)",
    ),
    (
        "idx_cves_source_identifier",
        "CREATE INDEX idx_cves_source_identifier ON cves(source_identifier)",
    ),
];

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        // Connect to database with foreign key enforcement and WAL mode
        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };

        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::MigrationFailed(format!(
                "Failed to create schema_version table: {}",
                e
            )))
        })?;

        let current_version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to query schema version: {}",
                        e
                    )))
                })?
                .flatten();

        let current_version = current_version.unwrap_or(0);

        if current_version < 1 {
            Self::apply_migration(&mut conn, 1, SCHEMA_V1).await?;
        }
        if current_version < 2 {
            Self::apply_migration(&mut conn, 2, SCHEMA_V2).await?;
        }
        if current_version < 3 {
            Self::apply_migration(&mut conn, 3, SCHEMA_V3).await?;
        }

        Ok(())
    }

    /// Apply one migration inside a transaction and record its version
    async fn apply_migration(
        conn: &mut SqliteConnection,
        version: i32,
        statements: &[(&str, &str)],
    ) -> Result<()> {
        tracing::info!("Applying database migration v{}", version);

        // Wrap migration in a transaction so partial failures don't leave the DB in a broken state
        sqlx::query("BEGIN")
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to begin transaction: {}",
                    e
                )))
            })?;

        let result = async {
            for &(name, sql) in statements {
                sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
                    Error::Database(DatabaseError::MigrationFailed(format!(
                        "Failed to create {}: {}",
                        name, e
                    )))
                })?;
            }
            Self::record_migration(conn, version).await?;
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                sqlx::query("COMMIT")
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::MigrationFailed(format!(
                            "Failed to commit migration v{}: {}",
                            version, e
                        )))
                    })?;
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                return Err(e);
            }
        }

        tracing::info!("Database migration v{} complete", version);
        Ok(())
    }

    /// Record a migration version
    async fn record_migration(conn: &mut SqliteConnection, version: i32) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(now)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Close the database connection
    ///
    /// Other clones of this handle share the pool and are closed as well.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
