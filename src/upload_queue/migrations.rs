//! Versioned, additive schema migrations for the queue database
//!
//! Applied in order inside a transaction per migration, tracked in
//! `schema_migrations`. Re-running is a no-op; failure to migrate is
//! fatal at startup.

use crate::error::{Error, Result};
use sqlx::SqlitePool;

struct Migration {
    version: i64,
    name: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_upload_queue_and_connectivity_log",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS upload_queue (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                video_path TEXT NOT NULL,
                camera_id TEXT NOT NULL,
                destination_key TEXT,
                session_id TEXT,
                file_size INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                last_attempt TEXT,
                error_message TEXT,
                remote_url TEXT,
                registration_linked INTEGER NOT NULL DEFAULT 0,
                recorded_at TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_upload_queue_status ON upload_queue(status)",
            "CREATE INDEX IF NOT EXISTS idx_upload_queue_path ON upload_queue(video_path)",
            r#"
            CREATE TABLE IF NOT EXISTS connectivity_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                network_reachable INTEGER NOT NULL,
                service_reachable INTEGER NOT NULL,
                checked_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        ],
    },
    Migration {
        version: 2,
        name: "add_site_subsite_placement",
        statements: &[
            "ALTER TABLE upload_queue ADD COLUMN site TEXT",
            "ALTER TABLE upload_queue ADD COLUMN subsite TEXT",
        ],
    },
];

/// Apply any pending migrations. Idempotent.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    for migration in MIGRATIONS {
        let applied: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM schema_migrations WHERE version = ?")
                .bind(migration.version)
                .fetch_optional(pool)
                .await?;
        if applied.is_some() {
            continue;
        }

        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await.map_err(|e| {
                Error::Config(format!(
                    "migration {} ({}) failed: {}",
                    migration.version, migration.name, e
                ))
            })?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES (?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Queue schema migration applied"
        );
    }

    Ok(())
}
