//! The single-server query engine.

use std::fmt;
use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::ops::Deref;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{debug, trace, warn};
use unidns_proto::rdata::{EdnsOption, TSIG};
use unidns_proto::{
    EdnsConfig, Header, HeaderFlags, Message, Opcode, Question, RCode, Record, RecordType,
};

use crate::augment::{apply_edns, apply_signature, edns_config};
use crate::axfr::{AxfrClient, ZoneTransfer};
use crate::error::{ConfigError, Error, FormatError};
use crate::net::{
    DatagramTransport, Deadline, StreamConnector, TcpConnection, TcpConnector, UdpTransport,
};
use crate::pool::{ConnectionPool, Session};
use crate::stream;
use crate::tsig::{TsigSigner, TsigState};
use crate::{DEFAULT_PORT, DEFAULT_TIMEOUT, DEFAULT_UDP_SIZE};

static DEFAULT_RESOLVER: OnceLock<String> = OnceLock::new();

/// Sets the hostname used by resolvers constructed without one. Can only be set once per process.
pub fn set_default_resolver(hostname: impl Into<String>) -> Result<(), ConfigError> {
    DEFAULT_RESOLVER
        .set(hostname.into())
        .map_err(|_| ConfigError::DefaultResolverAlreadySet)
}

/// The hostname set by [`set_default_resolver()`], or `localhost`.
pub fn default_resolver() -> &'static str {
    DEFAULT_RESOLVER.get().map(String::as_str).unwrap_or("localhost")
}

/// Resolves `hostname` to the address of a DNS server.
///
/// `hostname` may carry a port (`192.0.2.1:5353`); otherwise port 53 is used. `"0"` is the local
/// host.
pub fn resolve_host(hostname: &str) -> Result<SocketAddr, ConfigError> {
    if hostname == "0" {
        return Ok(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), DEFAULT_PORT));
    }
    if let Ok(addr) = hostname.parse::<SocketAddr>() {
        return Ok(addr);
    }
    (hostname, DEFAULT_PORT)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ConfigError::UnknownHost(hostname.to_string()))
}

/// A parsed response and the outcome of checking its signature.
#[derive(Clone, Debug)]
pub struct Response {
    pub message: Message,
    pub tsig_state: TsigState,
}

impl Response {
    pub fn into_message(self) -> Message {
        self.message
    }
}

impl Deref for Response {
    type Target = Message;

    fn deref(&self) -> &Message {
        &self.message
    }
}

/// The transport a query is currently travelling over.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Transport {
    Datagram,
    Stream,
}

/// Sends queries to one DNS server.
///
/// Small queries go out as datagrams and are retried over a stream connection if the response
/// is truncated. With a [`Session`], stream connections are kept open and shared with the other
/// resolvers of the session.
///
/// A resolver can be shared between threads; each call to [`send()`](Self::send()) is independent.
pub struct Resolver<D = UdpTransport, S = TcpConnector>
where
    S: StreamConnector,
{
    address: SocketAddr,
    local_address: Option<SocketAddr>,
    use_tcp: bool,
    ignore_truncation: bool,
    edns: Option<EdnsConfig>,
    tsig_key: Option<Arc<dyn TsigSigner>>,
    timeout: Duration,
    recycle_connections: bool,
    datagram: D,
    stream: S,
    session: Option<Session<S::Connection>>,
    transfer: Arc<dyn ZoneTransfer>,
}

impl Resolver {
    /// Creates a resolver for `hostname`, or for [`default_resolver()`] if it is [`None`].
    ///
    /// Stream connections are closed after every query.
    pub fn new(hostname: Option<&str>) -> Result<Self, Error> {
        let address = resolve_host(hostname.unwrap_or(default_resolver()))?;
        Ok(Self::with_transports(address, UdpTransport, TcpConnector, None))
    }

    /// Like [`new()`](Self::new()), but stream connections are pooled in `session`.
    pub fn with_session(
        session: Session<TcpConnection>,
        hostname: Option<&str>,
    ) -> Result<Self, Error> {
        let address = resolve_host(hostname.unwrap_or(default_resolver()))?;
        Ok(Self::with_transports(
            address,
            UdpTransport,
            TcpConnector,
            Some(session),
        ))
    }
}

impl<D: DatagramTransport, S: StreamConnector> Resolver<D, S> {
    /// Creates a resolver for `address` that uses the given transports.
    pub fn with_transports(
        address: SocketAddr,
        datagram: D,
        stream: S,
        session: Option<Session<S::Connection>>,
    ) -> Self {
        Self {
            address,
            local_address: None,
            use_tcp: false,
            ignore_truncation: false,
            edns: None,
            tsig_key: None,
            timeout: DEFAULT_TIMEOUT,
            recycle_connections: true,
            datagram,
            stream,
            session,
            transfer: Arc::new(AxfrClient::new(TcpConnector)),
        }
    }

    pub fn set_address(&mut self, address: SocketAddr) {
        self.address = address;
    }

    /// Changes the server's IP address, keeping the port.
    pub fn set_ip(&mut self, ip: IpAddr) {
        self.address.set_ip(ip);
    }

    pub fn set_port(&mut self, port: u16) {
        self.address.set_port(port);
    }

    /// Sets the address queries are sent from. [`None`] lets the OS choose.
    pub fn set_local_address(&mut self, local: Option<SocketAddr>) {
        self.local_address = local;
    }

    /// Sets the IP address queries are sent from, keeping a previously set local port.
    pub fn set_local_ip(&mut self, ip: IpAddr) {
        let port = self.local_address.map_or(0, |addr| addr.port());
        self.local_address = Some(SocketAddr::new(ip, port));
    }

    /// Sends every query over a stream connection.
    pub fn set_tcp(&mut self, use_tcp: bool) {
        self.use_tcp = use_tcp;
    }

    /// Accepts truncated datagram responses instead of retrying over a stream connection.
    pub fn set_ignore_truncation(&mut self, ignore: bool) {
        self.ignore_truncation = ignore;
    }

    /// Enables (`0`) or disables (`-1`) EDNS with the default payload size and no options.
    pub fn set_edns(&mut self, level: i32) -> Result<(), ConfigError> {
        self.set_edns_with(level, 0, 0, Vec::new())
    }

    /// Enables (`0`) or disables (`-1`) EDNS. A `payload_size` of 0 selects
    /// [`EdnsConfig::DEFAULT_PAYLOAD_SIZE`].
    pub fn set_edns_with(
        &mut self,
        level: i32,
        payload_size: u16,
        flags: u16,
        options: Vec<EdnsOption>,
    ) -> Result<(), ConfigError> {
        self.edns = edns_config(level, payload_size, flags, options)?;
        Ok(())
    }

    pub fn set_tsig_key(&mut self, key: Option<Arc<dyn TsigSigner>>) {
        self.tsig_key = key;
    }

    /// Sets the time a query may take, `secs` plus `millis`.
    pub fn set_timeout(&mut self, secs: u64, millis: u64) {
        self.timeout = Duration::from_secs(secs) + Duration::from_millis(millis);
    }

    pub fn set_timeout_secs(&mut self, secs: u64) {
        self.set_timeout(secs, 0);
    }

    /// Whether stream connections are returned to the session's pool. Has no effect without a
    /// session.
    pub fn set_recycle_connections(&mut self, recycle: bool) {
        self.recycle_connections = recycle;
    }

    /// Replaces the client used for `AXFR` queries.
    pub fn set_zone_transfer(&mut self, transfer: Arc<dyn ZoneTransfer>) {
        self.transfer = transfer;
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn local_address(&self) -> Option<SocketAddr> {
        self.local_address
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn tsig_key(&self) -> Option<&Arc<dyn TsigSigner>> {
        self.tsig_key.as_ref()
    }

    pub fn edns(&self) -> Option<&EdnsConfig> {
        self.edns.as_ref()
    }

    pub fn session(&self) -> Option<&Session<S::Connection>> {
        self.session.as_ref()
    }

    fn pool(&self) -> Option<&ConnectionPool<S::Connection>> {
        if !self.recycle_connections {
            return None;
        }
        self.session.as_ref().map(Session::pool)
    }

    /// Sends `query` and waits for the response.
    ///
    /// The query itself is left untouched; the configured `OPT` record and signature are added to
    /// a copy. `AXFR` queries are answered with a single message holding the whole zone.
    pub fn send(&self, query: &Message) -> Result<Response, Error> {
        if let Some(question) = zone_transfer(query) {
            return self.send_axfr(query.id(), question);
        }

        let mut query = query.clone();
        apply_edns(&mut query, self.edns.as_ref());
        apply_signature(&mut query, self.tsig_key.as_deref())?;
        let data = query.encode()?;
        let request_tsig = query.tsig().map(|(_, tsig)| tsig.clone());

        let max_udp_size = query
            .opt()
            .map_or(DEFAULT_UDP_SIZE, |opt| opt.payload_size as usize);
        let deadline = Deadline::after(self.timeout);
        let mut transport = if self.use_tcp || data.len() > max_udp_size {
            Transport::Stream
        } else {
            Transport::Datagram
        };

        loop {
            debug!(?transport, server = %self.address, id = query.id(), "sending query");
            let raw = match transport {
                Transport::Datagram => self.datagram.send_recv(
                    self.local_address,
                    self.address,
                    &data,
                    max_udp_size,
                    deadline,
                )?,
                Transport::Stream => stream::exchange(
                    &self.stream,
                    self.pool(),
                    self.local_address,
                    self.address,
                    &data,
                    deadline,
                )
                .ok_or(Error::NoResponse(self.address))?,
            };
            trace!(bytes = raw.len(), "received response");

            if raw.is_empty() {
                return Err(Error::NoResponse(self.address));
            }
            if raw.len() < Header::LENGTH {
                return Err(FormatError::TooShort(raw.len()).into());
            }
            let id = u16::from_be_bytes([raw[0], raw[1]]);
            if id != query.id() {
                if transport == Transport::Datagram {
                    debug!(expected = query.id(), got = id, "discarding response with wrong id");
                    continue;
                }
                return Err(FormatError::IdMismatch {
                    expected: query.id(),
                    got: id,
                }
                .into());
            }

            let message =
                Message::parse(&mut Cursor::new(&raw[..])).map_err(FormatError::Parse)?;
            let tsig_state = self.verify_signature(&message, &raw, request_tsig.as_ref());

            let truncated = message.header.flags.tc && !self.ignore_truncation;
            if transport == Transport::Datagram && truncated {
                debug!(id, "response truncated, retrying over stream");
                transport = Transport::Stream;
                continue;
            }

            return Ok(Response {
                message,
                tsig_state,
            });
        }
    }

    fn verify_signature(&self, msg: &Message, raw: &[u8], request: Option<&TSIG>) -> TsigState {
        let Some(key) = &self.tsig_key else {
            return TsigState::Unverified;
        };
        match key.verify(msg, raw, request) {
            Ok(()) => TsigState::Verified,
            Err(e) => {
                warn!(key = %key.name(), error = %e, "response signature rejected");
                TsigState::Failed
            }
        }
    }

    fn send_axfr(&self, id: u16, question: &Question) -> Result<Response, Error> {
        // whole seconds, at least one
        let timeout = Duration::from_secs(self.timeout.as_secs().max(1));
        let records = self
            .transfer
            .transfer(
                &question.qname,
                self.address,
                self.tsig_key.as_deref(),
                timeout,
            )
            .map_err(FormatError::Transfer)?;

        let flags = HeaderFlags {
            aa: true,
            ..Default::default()
        };
        let answers = records.into_iter().map(Record::NONOPT).collect();
        let message = Message::new_response(
            id,
            Opcode::QUERY,
            flags,
            RCode::NOERROR,
            vec![question.clone()],
            [answers, Vec::new(), Vec::new()],
        );
        // a transfer with a key only succeeds if its signature chain verified
        let tsig_state = match self.tsig_key {
            Some(_) => TsigState::Verified,
            None => TsigState::Unverified,
        };
        Ok(Response {
            message,
            tsig_state,
        })
    }
}

/// Returns the question of `query` if it asks for a zone transfer.
fn zone_transfer(query: &Message) -> Option<&Question> {
    query
        .question()
        .filter(|q| query.header.opcode == Opcode::QUERY && q.qtype == RecordType::AXFR)
}

impl<D, S: StreamConnector> fmt::Debug for Resolver<D, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("address", &self.address)
            .field("local_address", &self.local_address)
            .field("use_tcp", &self.use_tcp)
            .field("ignore_truncation", &self.ignore_truncation)
            .field("edns", &self.edns)
            .field("tsig_key", &self.tsig_key)
            .field("timeout", &self.timeout)
            .field("recycle_connections", &self.recycle_connections)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv6Addr, SocketAddr};
    use std::time::Duration;

    use unidns_proto::rdata::{EdnsOption, OptionCode};
    use unidns_proto::{HeaderFlags, Message, Name, Opcode, RecordType};

    use super::*;

    fn resolver() -> Resolver {
        Resolver::new(Some("192.0.2.53")).unwrap()
    }

    #[test]
    fn hostnames() {
        assert_eq!(
            resolve_host("0").unwrap(),
            SocketAddr::from(([127, 0, 0, 1], 53))
        );
        assert_eq!(
            resolve_host("192.0.2.1:5353").unwrap(),
            SocketAddr::from(([192, 0, 2, 1], 5353))
        );
        assert_eq!(resolve_host("::1").unwrap().port(), 53);
        assert!(matches!(
            resolve_host("no such host.invalid"),
            Err(ConfigError::UnknownHost(_))
        ));
    }

    #[test]
    fn default_resolver_is_set_once() {
        set_default_resolver("0").unwrap();
        assert_eq!(default_resolver(), "0");
        assert!(matches!(
            set_default_resolver("192.0.2.1"),
            Err(ConfigError::DefaultResolverAlreadySet)
        ));
    }

    #[test]
    fn timeout_arithmetic() {
        let mut res = resolver();
        assert_eq!(res.timeout(), Duration::from_secs(30));
        res.set_timeout(2, 1500);
        assert_eq!(res.timeout(), Duration::from_millis(3500));
        res.set_timeout_secs(7);
        assert_eq!(res.timeout(), Duration::from_secs(7));
    }

    #[test]
    fn address_setters() {
        let mut res = resolver();
        res.set_port(5353);
        res.set_ip(IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(res.address(), "[::1]:5353".parse().unwrap());

        assert_eq!(res.local_address(), None);
        res.set_local_address(Some("0.0.0.0:4000".parse().unwrap()));
        res.set_local_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(res.local_address(), Some("127.0.0.1:4000".parse().unwrap()));
    }

    #[test]
    fn edns_setters() {
        let mut res = resolver();
        assert!(res.edns().is_none());
        res.set_edns(0).unwrap();
        assert_eq!(res.edns().unwrap().payload_size, 1280);

        res.set_edns_with(0, 4096, 0, vec![EdnsOption::new(OptionCode::Nsid, vec![])])
            .unwrap();
        assert_eq!(res.edns().unwrap().payload_size, 4096);

        assert!(matches!(
            res.set_edns(3),
            Err(ConfigError::InvalidEdnsLevel(3))
        ));
        // a rejected level leaves the previous configuration in place
        assert_eq!(res.edns().unwrap().options.len(), 1);

        res.set_edns(-1).unwrap();
        assert!(res.edns().is_none());
    }

    #[test]
    fn zone_transfers_are_detected() {
        let name = Name::from_ascii("example.com").unwrap();
        let query = |qtype, opcode| {
            Message::new_query(name.clone(), qtype, opcode, HeaderFlags::default(), None).unwrap()
        };
        let axfr = query(RecordType::AXFR, Opcode::QUERY);
        assert_eq!(zone_transfer(&axfr), axfr.question());
        assert!(zone_transfer(&query(RecordType::AXFR, Opcode::NOTIFY)).is_none());
        assert!(zone_transfer(&query(RecordType::SOA, Opcode::QUERY)).is_none());

        let mut empty = axfr.clone();
        empty.questions.clear();
        assert!(zone_transfer(&empty).is_none());
    }
}
