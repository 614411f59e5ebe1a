//! SQLite storage engine.

use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use futures::TryStreamExt;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Sqlite, SqliteConnection};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::instrument;

use super::{Entry, EntryStream, Transaction, prefix_upper_bound};
use crate::Backend;
use crate::error::{ErrorKind, Result};

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// Readers only; writes are serialized behind `writer` anyway.
const MAX_CONNECTIONS: u32 = 5;

const GET: &str = include_str!("../../queries/get.sql");
const PUT: &str = include_str!("../../queries/put.sql");
const DELETE: &str = include_str!("../../queries/delete.sql");
const SCAN_RANGE: &str = include_str!("../../queries/scan_range.sql");
const SCAN_FROM: &str = include_str!("../../queries/scan_from.sql");

/// Persistent backend storing every namespace in a single SQLite table.
///
/// `BLOB` keys compare with `memcmp`, so `ORDER BY key` matches the bytewise
/// ordering of every other engine.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    name: String,
    pool: SqlitePool,
    // Deferred SQLite transactions that read before writing fail with
    // SQLITE_BUSY when another writer commits in between. One writer at a
    // time, enforced here rather than by the busy timeout.
    writer: Arc<Mutex<()>>,
}

impl SqliteBackend {
    async fn new(options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let mut pool_options = SqlitePoolOptions::new()
            // Apply the query-based PRAGMAs to every pooled connection, not
            // only the first one handed out.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS));
        if max == Some(1) {
            // A single ":memory:" connection is the whole database; it must
            // never be reaped.
            pool_options = pool_options.min_connections(1).idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let backend = Self { name: "sqlite".to_string(), pool, writer: Arc::new(Mutex::new(())) };
        backend.migrate().await?;
        Ok(backend)
    }

    /// Open (or create) the database file at `path`, creating missing parent
    /// directories, and run migrations.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::InvalidPath(path.to_path_buf()))?;
        }
        let options = Self::base_options().filename(path).create_if_missing(true);
        Self::new(options, None).await
    }

    /// Connect to an in-memory database.
    ///
    /// The database disappears with its only connection. Not gated behind
    /// `cfg(test)` so other crates can use it in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Separate connections to ":memory:" are separate databases.
        Self::new(options, Some(1)).await
    }

    /// Change the name of the backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // WAL lets scans proceed while a transaction is open.
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_millis(1500))
            .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::None)
    }

    /// Apply additional PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA locking_mode = NORMAL;
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA cache_size = -8192;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    #[instrument("performing database migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool.
    ///
    /// Waits for every connection to be returned to the pool. The backend
    /// must not be used afterwards.
    pub async fn close(&self) {
        // Let SQLite update query planner statistics
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        sqlx::query_scalar::<_, Vec<u8>>(GET)
            .bind(namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    fn scan_stream<'a>(&'a self, namespace: &'a str, prefix: &'a [u8]) -> EntryStream<'a> {
        Box::pin(stream! {
            // A single SELECT reads one WAL snapshot from start to finish.
            let query = match prefix_upper_bound(prefix) {
                Some(upper) => sqlx::query_as::<_, (Vec<u8>, Vec<u8>)>(SCAN_RANGE).bind(namespace).bind(prefix).bind(upper),
                None => sqlx::query_as::<_, (Vec<u8>, Vec<u8>)>(SCAN_FROM).bind(namespace).bind(prefix),
            };
            let mut rows = query.fetch(&self.pool);
            loop {
                match rows.try_next().await {
                    Ok(Some((key, value))) => yield Ok(Entry { key, value }),
                    Ok(None) => break,
                    Err(e) => {
                        let err: Result<Entry> = Err(e).or_raise(|| ErrorKind::Database);
                        yield err;
                        break;
                    },
                }
            }
        })
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let writer = Arc::clone(&self.writer).lock_owned().await;
        let tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Ok(Box::new(SqliteTransaction { tx: Some(tx), _writer: writer }))
    }
}

/// A SQLite transaction holding the backend's writer lock.
///
/// Field order matters: the transaction rolls back on drop before the writer
/// lock is released.
struct SqliteTransaction {
    tx: Option<sqlx::Transaction<'static, Sqlite>>,
    _writer: OwnedMutexGuard<()>,
}

impl SqliteTransaction {
    fn open(&mut self) -> Result<&mut sqlx::Transaction<'static, Sqlite>> {
        match self.tx.as_mut() {
            Some(tx) => Ok(tx),
            None => exn::bail!(ErrorKind::TransactionClosed),
        }
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn get(&mut self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let tx = self.open()?;
        sqlx::query_scalar::<_, Vec<u8>>(GET)
            .bind(namespace)
            .bind(key)
            .fetch_optional(&mut **tx)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    async fn put(&mut self, namespace: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let tx = self.open()?;
        sqlx::query(PUT)
            .bind(namespace)
            .bind(key)
            .bind(value)
            .execute(&mut **tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn delete(&mut self, namespace: &str, key: &[u8]) -> Result<()> {
        let tx = self.open()?;
        sqlx::query(DELETE).bind(namespace).bind(key).execute(&mut **tx).await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let Some(tx) = self.tx.take() else {
            exn::bail!(ErrorKind::TransactionClosed);
        };
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }
}
