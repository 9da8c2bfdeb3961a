//! One query/response exchange over a stream connection, reusing a pooled connection if possible.

use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::net::{Deadline, StreamConnection, StreamConnector};
use crate::pool::ConnectionPool;

/// The two ways of obtaining a connection, tried in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attempt {
    /// Take an idle connection from the pool, or open one if there is none.
    TryPooled,
    /// Always open a new connection.
    CreateFresh,
}

/// Sends `data` to `remote` and returns the response, or [`None`] if both attempts failed.
///
/// With a `pool`, idle connections are reused and successful connections are returned to it;
/// without one, every connection is closed after use. A connection that failed is never pooled.
pub(crate) fn exchange<S: StreamConnector>(
    connector: &S,
    pool: Option<&ConnectionPool<S::Connection>>,
    local: Option<SocketAddr>,
    remote: SocketAddr,
    data: &[u8],
    deadline: Deadline,
) -> Option<Vec<u8>> {
    for attempt in [Attempt::TryPooled, Attempt::CreateFresh] {
        let pooled = match (attempt, pool) {
            (Attempt::TryPooled, Some(pool)) => pool.acquire(remote),
            _ => None,
        };
        let mut conn = match pooled {
            Some(mut conn) => {
                conn.set_deadline(deadline);
                conn
            }
            None => match connector.connect(local, remote, deadline) {
                Ok(conn) => {
                    if let Some(pool) = pool {
                        pool.record_created();
                    }
                    conn
                }
                Err(e) => {
                    warn!(?attempt, %remote, error = %e, "could not connect");
                    continue;
                }
            },
        };

        let result = conn.send(data).and_then(|()| conn.recv());
        match result {
            Ok(Some(response)) if !response.is_empty() => {
                match pool {
                    Some(pool) => pool.release(remote, conn),
                    None => conn.close(),
                }
                debug!(?attempt, %remote, "stream exchange done");
                return Some(response);
            }
            Ok(_) => warn!(?attempt, %remote, "connection returned no data"),
            Err(e) => warn!(?attempt, %remote, error = %e, "stream exchange failed"),
        }
        match pool {
            Some(pool) => pool.discard(conn),
            None => conn.close(),
        }
    }

    None
}
