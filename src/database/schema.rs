/*!
 * Table layout of the queue database.
 *
 * The schema version lives in `PRAGMA user_version`. Each entry of
 * `MIGRATIONS` moves the file one version forward; pending entries run in a
 * single transaction so a half-migrated file is never left behind.
 */

use anyhow::{Context, Result, bail};
use log::{debug, info};
use rusqlite::Connection;

/// Ordered migrations; entry `n` upgrades version `n` to `n + 1`
const MIGRATIONS: &[&str] = &[
    // v1: jobs, resources, translations. Timestamps are unix milliseconds.
    r#"
    CREATE TABLE jobs (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL,
        state TEXT NOT NULL DEFAULT 'waiting',
        attempts INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        progress INTEGER NOT NULL DEFAULT 0,
        run_at INTEGER NOT NULL,
        lease_until INTEGER,
        failed_reason TEXT,
        return_value TEXT,
        created_at INTEGER NOT NULL,
        finished_at INTEGER
    );
    CREATE INDEX idx_jobs_claim ON jobs(state, kind, run_at);
    CREATE INDEX idx_jobs_lease ON jobs(state, lease_until);

    CREATE TABLE resources (
        id TEXT PRIMARY KEY,
        shop_id TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        data TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX idx_resources_shop ON resources(shop_id, status);

    CREATE TABLE translations (
        resource_id TEXT NOT NULL REFERENCES resources(id) ON DELETE CASCADE,
        language TEXT NOT NULL,
        shop_id TEXT NOT NULL,
        fields TEXT NOT NULL,
        needs_review INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (resource_id, language)
    );
    "#,
];

/// Version a fully migrated file reports
pub fn latest_version() -> u32 {
    MIGRATIONS.len() as u32
}

pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .context("Failed to read schema version")?;
    Ok(version)
}

/// Configure the connection and apply any pending migrations
pub fn initialize_schema(conn: &Connection) -> Result<()> {
    // WAL lets worker processes read while one of them writes
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;

    let current = schema_version(conn)?;
    let latest = latest_version();
    if current > latest {
        bail!("Database schema v{} is newer than this build supports (v{})", current, latest);
    }
    if current == latest {
        debug!("Database schema is at v{}", current);
        return Ok(());
    }

    info!("Migrating database schema from v{} to v{}", current, latest);
    let mut script = String::from("BEGIN IMMEDIATE;");
    for migration in &MIGRATIONS[current as usize..] {
        script.push_str(migration);
    }
    script.push_str(&format!("PRAGMA user_version = {latest}; COMMIT;"));

    if let Err(e) = conn.execute_batch(&script) {
        let _ = conn.execute_batch("ROLLBACK;");
        return Err(e).context("Schema migration failed");
    }
    Ok(())
}
