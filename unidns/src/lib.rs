//! A DNS query engine for a single server.
//!
//! A [`Resolver`] sends a [`Message`](proto::Message) over UDP, falls back to TCP when the
//! response is truncated, and can add EDNS and TSIG records to the query on the way out. Stream
//! connections can be shared between resolvers through a [`Session`].
//!
//! ```no_run
//! use unidns::proto::{HeaderFlags, Message, Name, Opcode, RecordType};
//! use unidns::Resolver;
//!
//! let mut resolver = Resolver::new(Some("192.0.2.53"))?;
//! resolver.set_edns(0)?;
//! let query = Message::new_query(
//!     Name::from_ascii("example.com")?,
//!     RecordType::A,
//!     Opcode::QUERY,
//!     HeaderFlags { rd: true, ..Default::default() },
//!     None,
//! )?;
//! let response = resolver.send(&query)?;
//! println!("{}", response.as_string(None));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::time::Duration;

pub use unidns_proto as proto;

pub mod augment;
pub mod axfr;
pub mod error;
pub mod net;
pub mod pool;
pub mod resolver;
mod stream;
pub mod tsig;

pub use axfr::{AxfrClient, TransferError, ZoneTransfer};
pub use error::{ConfigError, Error, FormatError};
pub use pool::{ConnectionPool, PoolStats, Session};
pub use resolver::{default_resolver, resolve_host, set_default_resolver, Resolver, Response};
pub use tsig::{Algorithm, HmacKey, TsigSigner, TsigState};

/// The port DNS servers listen on.
pub const DEFAULT_PORT: u16 = 53;

/// The largest datagram response accepted from a server when the query has no `OPT` record.
pub const DEFAULT_UDP_SIZE: usize = 512;

/// The UDP payload size advertised when EDNS is enabled without an explicit size.
pub const DEFAULT_EDNS_PAYLOAD_SIZE: u16 = proto::EdnsConfig::DEFAULT_PAYLOAD_SIZE;

/// How long a query may take unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
