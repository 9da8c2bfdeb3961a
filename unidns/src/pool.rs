//! Reuse of idle stream connections across queries.

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::net::StreamConnection;

/// Idle stream connections, each tagged with the server it is connected to.
///
/// A connection only enters the pool right after it completed an exchange; a connection that
/// failed is closed instead. The lock is held for list operations only, never across I/O.
pub struct ConnectionPool<C> {
    idle: Mutex<VecDeque<(SocketAddr, C)>>,
    created: AtomicU64,
    reused: AtomicU64,
    discarded: AtomicU64,
}

/// Counters of a [`ConnectionPool`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections opened on behalf of this pool's users.
    pub created: u64,
    /// Connections handed out again by [`ConnectionPool::acquire()`].
    pub reused: u64,
    /// Connections closed through [`ConnectionPool::discard()`] or [`ConnectionPool::clear()`].
    pub discarded: u64,
    /// Connections currently idle in the pool.
    pub idle: usize,
}

impl<C: StreamConnection> ConnectionPool<C> {
    pub fn new() -> Self {
        Self {
            idle: Mutex::new(VecDeque::new()),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
        }
    }

    /// Takes the oldest idle connection to `remote`, if there is one. Never waits.
    pub fn acquire(&self, remote: SocketAddr) -> Option<C> {
        let conn = {
            let mut idle = self.idle.lock();
            let pos = idle.iter().position(|(addr, _)| *addr == remote)?;
            idle.remove(pos).map(|(_, conn)| conn)
        };
        if conn.is_some() {
            self.reused.fetch_add(1, Ordering::Relaxed);
            debug!(%remote, "reusing pooled connection");
        }
        conn
    }

    /// Returns a connection that just completed an exchange with `remote`.
    pub fn release(&self, remote: SocketAddr, conn: C) {
        let idle = {
            let mut idle = self.idle.lock();
            idle.push_back((remote, conn));
            idle.len()
        };
        debug!(%remote, idle, "returned connection to pool");
    }

    /// Closes a connection that must not be used again.
    pub fn discard(&self, conn: C) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        conn.close();
    }

    /// Counts a connection opened by a user of this pool.
    pub fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    /// Closes every idle connection.
    pub fn clear(&self) {
        let drained: Vec<_> = self.idle.lock().drain(..).collect();
        debug!(count = drained.len(), "clearing connection pool");
        for (_, conn) in drained {
            self.discard(conn);
        }
    }

    pub fn len(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            idle: self.len(),
        }
    }
}

impl<C: StreamConnection> Default for ConnectionPool<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("idle", &self.idle.lock().len())
            .field("created", &self.created.load(Ordering::Relaxed))
            .field("reused", &self.reused.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A group of resolvers sharing one [`ConnectionPool`].
///
/// Cloning a session is cheap; all clones share the same pool.
pub struct Session<C> {
    pool: Arc<ConnectionPool<C>>,
}

impl<C: StreamConnection> Session<C> {
    pub fn new() -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new()),
        }
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }
}

impl<C: StreamConnection> Default for Session<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<C> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").field("pool", &self.pool).finish()
    }
}
