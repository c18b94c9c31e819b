/*!
 * SQLite connection handle shared by the repository.
 *
 * One `rusqlite::Connection` per process, guarded by a mutex and only ever
 * touched from tokio's blocking pool. Worker processes sharing the file rely
 * on WAL mode and the busy timeout to take turns writing.
 */

use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::schema;

const DATA_DIR: &str = "storelingo";
const DATA_FILE: &str = "queue.db";
const IN_MEMORY: &str = ":memory:";

/// Cloneable handle to the process-wide connection
#[derive(Clone)]
pub struct DatabaseConnection {
    path: PathBuf,
    inner: Arc<Mutex<Connection>>,
}

impl fmt::Debug for DatabaseConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConnection").field("path", &self.path).finish()
    }
}

impl DatabaseConnection {
    /// Open the file (creating it and its directory), apply the busy timeout
    /// and bring the schema up to date
    pub fn open<P: AsRef<Path>>(path: P, busy_timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create database directory {}", dir.display()))?;
        }

        info!("Opening database {}", path.display());
        let conn = Connection::open(&path).with_context(|| format!("Failed to open database {}", path.display()))?;
        conn.busy_timeout(busy_timeout).context("Failed to set busy timeout")?;
        schema::initialize_schema(&conn)?;

        Ok(Self::wrap(path, conn))
    }

    /// Private in-memory database; used by tests
    pub fn new_in_memory() -> Result<Self> {
        debug!("Opening in-memory database");
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        schema::initialize_schema(&conn)?;
        Ok(Self::wrap(PathBuf::from(IN_MEMORY), conn))
    }

    fn wrap(path: PathBuf, conn: Connection) -> Self {
        Self {
            path,
            inner: Arc::new(Mutex::new(conn)),
        }
    }

    /// `<local data dir>/storelingo/queue.db`
    pub fn default_database_path() -> Result<PathBuf> {
        dirs::data_local_dir()
            .or_else(dirs::data_dir)
            .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
            .map(|base| base.join(DATA_DIR).join(DATA_FILE))
            .ok_or_else(|| anyhow!("Could not determine a data directory for the database"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` on the connection from the calling thread
    pub fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        f(&self.inner.lock())
    }

    /// Run `f` on the blocking pool so the async runtime never waits on SQLite
    pub async fn execute_async<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.blocking(move |conn| f(conn)).await
    }

    /// Like `execute_async`, inside an IMMEDIATE transaction committed when
    /// `f` succeeds
    pub async fn transaction_async<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.blocking(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || f(&mut inner.lock()))
            .await
            .context("Database task panicked")?
    }

    /// Row counts and size of the database
    pub fn stats(&self) -> Result<DatabaseStats> {
        self.execute(|conn| {
            let stats = conn.query_row(
                "SELECT (SELECT COUNT(*) FROM jobs),
                        (SELECT COUNT(*) FROM resources),
                        (SELECT COUNT(*) FROM translations),
                        (SELECT page_count FROM pragma_page_count()) * (SELECT page_size FROM pragma_page_size())",
                [],
                |row| {
                    Ok(DatabaseStats {
                        job_count: row.get(0)?,
                        resource_count: row.get(1)?,
                        translation_count: row.get(2)?,
                        size_bytes: row.get(3)?,
                    })
                },
            )?;
            Ok(stats)
        })
    }
}

/// Row counts of the database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub job_count: i64,
    pub resource_count: i64,
    /// One row per resource and language
    pub translation_count: i64,
    pub size_bytes: i64,
}

impl fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} job(s), {} resource(s), {} translation(s), {} KB",
            self.job_count,
            self.resource_count,
            self.translation_count,
            self.size_bytes / 1024
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newInMemory_shouldReportMemoryPath() {
        let db = DatabaseConnection::new_in_memory().unwrap();
        assert_eq!(db.path(), Path::new(":memory:"));
    }

    #[test]
    fn test_open_shouldCreateFileAndParentDirectory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("queue.db");
        let db = DatabaseConnection::open(&path, Duration::from_millis(100)).unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), path.as_path());
    }

    #[test]
    fn test_open_onDirectory_shouldFail() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DatabaseConnection::open(dir.path(), Duration::from_millis(100)).is_err());
    }

    #[tokio::test]
    async fn test_stats_shouldCountRowsWrittenThroughTransactions() {
        let db = DatabaseConnection::new_in_memory().unwrap();
        assert_eq!(db.stats().unwrap().resource_count, 0);

        db.transaction_async(|tx| {
            tx.execute(
                "INSERT INTO resources (id, shop_id, resource_type, status, data, updated_at)
                 VALUES ('r1', 'shop', 'product', 'pending', '{}', 0)",
                [],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.resource_count, 1);
        assert_eq!(stats.job_count, 0);
        assert!(stats.size_bytes > 0);
    }

    #[tokio::test]
    async fn test_transactionAsync_withError_shouldRollBack() {
        let db = DatabaseConnection::new_in_memory().unwrap();

        let failed: Result<()> = db
            .transaction_async(|tx| {
                tx.execute(
                    "INSERT INTO resources (id, shop_id, resource_type, status, data, updated_at)
                     VALUES ('r1', 'shop', 'product', 'pending', '{}', 0)",
                    [],
                )?;
                Err(anyhow!("abort"))
            })
            .await;
        assert!(failed.is_err());

        let count: i64 = db
            .execute_async(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM resources", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
