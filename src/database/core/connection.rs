//! Connection registry
//!
//! The registry maps a `ConnectionIdentity` to exactly one pooled handle for
//! the lifetime of the registry. Writers share the registry through an `Arc`
//! and only ever borrow the pools it owns.
//!
//! Each pool pre-pings a connection before handing it out and recycles
//! connections older than `PoolOptions::recycle`, so a connection silently
//! dropped by the store or an intermediary is never used.

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use super::deadline::Deadline;
use crate::error::{PipelineError, PipelineResult};

/// URI scheme of SQLite-backed identities
pub const SQLITE_SCHEME: &str = "sqlite://";

/// Default interval after which a connection is discarded and re-established
pub const DEFAULT_RECYCLE: Duration = Duration::from_secs(7 * 3600);

/// A connection checked out of a pool
pub type Checkout = r2d2::PooledConnection<SqliteConnectionManager>;

/// Opaque string identifying one destination store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionIdentity(String);

impl ConnectionIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    /// Identity of a SQLite database file
    pub fn sqlite(path: impl AsRef<std::path::Path>) -> Self {
        Self(format!("{}{}", SQLITE_SCHEME, path.as_ref().display()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Database file path of a SQLite identity
    fn sqlite_path(&self) -> PipelineResult<PathBuf> {
        match self.0.strip_prefix(SQLITE_SCHEME) {
            Some(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
            _ => Err(PipelineError::connection(
                &self.0,
                format!("expected '{}<path>'", SQLITE_SCHEME),
            )),
        }
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pool tuning for one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_size: u32,
    pub min_idle: u32,
    /// Connections older than this are discarded and re-established
    pub recycle: Duration,
    pub idle_timeout: Duration,
    /// Bound on opening connections and on waiting for a free one
    pub connect_timeout: Duration,
    /// How long a statement waits on a locked database before failing
    pub busy_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 8,
            min_idle: 1,
            recycle: DEFAULT_RECYCLE,
            idle_timeout: Duration::from_secs(600),
            connect_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

impl PoolOptions {
    fn validate(&self, identity: &ConnectionIdentity) -> PipelineResult<()> {
        let problem = if self.max_size == 0 {
            Some("max_size must be at least 1".to_string())
        } else if self.min_idle > self.max_size {
            Some(format!(
                "min_idle ({}) exceeds max_size ({})",
                self.min_idle, self.max_size
            ))
        } else if self.connect_timeout.is_zero() {
            Some("connect_timeout must be non-zero".to_string())
        } else {
            None
        };

        match problem {
            Some(detail) => Err(PipelineError::connection(identity.as_str(), detail)),
            None => Ok(()),
        }
    }
}

/// Configure a freshly opened connection
fn configure(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;

    // WAL lets readers proceed while one writer holds the lock
    let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
    conn.execute("PRAGMA synchronous=NORMAL", [])?;
    conn.execute("PRAGMA foreign_keys=ON", [])?;
    Ok(())
}

/// Long-lived pooled handle bound to one identity
pub struct PooledConnection {
    identity: ConnectionIdentity,
    pool: r2d2::Pool<SqliteConnectionManager>,
    ddl_lock: Mutex<()>,
}

impl PooledConnection {
    fn open(identity: &ConnectionIdentity, options: &PoolOptions) -> PipelineResult<Self> {
        options.validate(identity)?;
        let path = identity.sqlite_path()?;

        let busy_timeout = options.busy_timeout;
        let manager = SqliteConnectionManager::file(&path)
            .with_init(move |conn| configure(conn, busy_timeout));

        let pool = r2d2::Pool::builder()
            .max_size(options.max_size)
            .min_idle(Some(options.min_idle))
            .max_lifetime(Some(options.recycle))
            .idle_timeout(Some(options.idle_timeout))
            .connection_timeout(options.connect_timeout)
            .test_on_check_out(true)
            .build(manager)
            .map_err(|e| PipelineError::connection(identity.as_str(), e))?;

        Ok(Self {
            identity: identity.clone(),
            pool,
            ddl_lock: Mutex::new(()),
        })
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    /// Check out one physical connection, waiting at most until `deadline`
    pub fn get(&self, deadline: &Deadline) -> PipelineResult<Checkout> {
        if deadline.is_expired() {
            return Err(PipelineError::Timeout {
                identity: self.identity.to_string(),
                operation: "connection checkout".to_string(),
            });
        }

        let result = match deadline.remaining() {
            Some(remaining) => self.pool.get_timeout(remaining),
            None => self.pool.get(),
        };

        result.map_err(|e| {
            if deadline.is_expired() {
                PipelineError::Timeout {
                    identity: self.identity.to_string(),
                    operation: "connection checkout".to_string(),
                }
            } else {
                PipelineError::connection(self.identity.as_str(), e)
            }
        })
    }

    /// Serializes DDL against this identity
    pub(crate) fn ddl_guard(&self) -> MutexGuard<'_, ()> {
        self.ddl_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of open and idle physical connections
    pub fn state(&self) -> (u32, u32) {
        let state = self.pool.state();
        (state.connections, state.idle_connections)
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (connections, idle) = self.state();
        f.debug_struct("PooledConnection")
            .field("identity", &self.identity)
            .field("connections", &connections)
            .field("idle", &idle)
            .finish()
    }
}

/// Thread-safe cache of one `PooledConnection` per identity
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ConnectionIdentity, Arc<PooledConnection>>>,
    create_lock: Mutex<()>,
    constructions: AtomicUsize,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the pooled handle for `identity`, opening it on first use
    ///
    /// Concurrent first-time callers for the same identity race on the
    /// creation lock; exactly one of them builds the pool and all of them
    /// receive the same handle.
    pub fn acquire(
        &self,
        identity: &ConnectionIdentity,
        options: &PoolOptions,
    ) -> PipelineResult<Arc<PooledConnection>> {
        if let Some(conn) = self.lookup(identity) {
            return Ok(conn);
        }

        let _creating = self
            .create_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(conn) = self.lookup(identity) {
            debug!("connection for {} was opened concurrently", identity);
            return Ok(conn);
        }

        info!("Opening connection pool for {}", identity);
        let conn = Arc::new(PooledConnection::open(identity, options)?);
        self.constructions.fetch_add(1, Ordering::SeqCst);

        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(identity.clone(), conn.clone());
        Ok(conn)
    }

    fn lookup(&self, identity: &ConnectionIdentity) -> Option<Arc<PooledConnection>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(identity)
            .cloned()
    }

    /// Number of pools built over the registry's lifetime
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    /// Number of cached identities
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use tempfile::TempDir;

    fn temp_identity(dir: &TempDir, name: &str) -> ConnectionIdentity {
        ConnectionIdentity::sqlite(dir.path().join(name))
    }

    #[test]
    fn test_acquire_reuses_handle() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConnectionRegistry::new();
        let identity = temp_identity(&dir, "a.db");

        let first = registry.acquire(&identity, &PoolOptions::default()).unwrap();
        let second = registry.acquire(&identity, &PoolOptions::default()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.constructions(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_identities_get_distinct_pools() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConnectionRegistry::new();

        let a = registry
            .acquire(&temp_identity(&dir, "a.db"), &PoolOptions::default())
            .unwrap();
        let b = registry
            .acquire(&temp_identity(&dir, "b.db"), &PoolOptions::default())
            .unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.constructions(), 2);
    }

    #[test]
    fn test_concurrent_first_acquire_constructs_once() {
        const WRITERS: usize = 16;
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(ConnectionRegistry::new());
        let identity = temp_identity(&dir, "race.db");
        let barrier = Arc::new(Barrier::new(WRITERS));

        let handles: Vec<_> = (0..WRITERS)
            .map(|_| {
                let registry = registry.clone();
                let identity = identity.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    registry.acquire(&identity, &PoolOptions::default()).unwrap()
                })
            })
            .collect();

        let conns: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(registry.constructions(), 1);
        assert!(conns.iter().all(|c| Arc::ptr_eq(c, &conns[0])));
    }

    #[test]
    fn test_malformed_options_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConnectionRegistry::new();
        let options = PoolOptions {
            max_size: 0,
            ..PoolOptions::default()
        };

        let err = registry
            .acquire(&temp_identity(&dir, "a.db"), &options)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Connection { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_malformed_identity_is_rejected() {
        let registry = ConnectionRegistry::new();
        let err = registry
            .acquire(&ConnectionIdentity::new("mysql://host/db"), &PoolOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("mysql://host/db"));
        assert_eq!(registry.constructions(), 0);
    }

    #[test]
    fn test_unreachable_store_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConnectionRegistry::new();
        let identity = ConnectionIdentity::sqlite(dir.path().join("missing").join("a.db"));
        let options = PoolOptions {
            connect_timeout: Duration::from_millis(200),
            ..PoolOptions::default()
        };

        let err = registry.acquire(&identity, &options).unwrap_err();
        assert!(matches!(err, PipelineError::Connection { .. }));
    }

    #[test]
    fn test_checkout_configures_connection() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConnectionRegistry::new();
        let pooled = registry
            .acquire(&temp_identity(&dir, "a.db"), &PoolOptions::default())
            .unwrap();

        let conn = pooled.get(&Deadline::none()).unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_checkout_with_expired_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ConnectionRegistry::new();
        let pooled = registry
            .acquire(&temp_identity(&dir, "a.db"), &PoolOptions::default())
            .unwrap();

        let err = pooled.get(&Deadline::after(Duration::ZERO)).unwrap_err();
        assert!(err.is_timeout());
    }
}
