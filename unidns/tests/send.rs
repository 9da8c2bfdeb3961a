//! End-to-end behaviour of `Resolver::send()` against scripted and real transports.

use std::collections::{HashSet, VecDeque};
use std::io::{self, Cursor, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, TcpListener, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use unidns::net::{
    DatagramTransport, Deadline, StreamConnection, StreamConnector, TcpConnection,
};
use unidns::proto::rdata::{A, SOA, TXT};
use unidns::proto::{
    Class, HeaderFlags, Message, Name, NonOptRecord, Opcode, RCode, Record, RecordType,
};
use unidns::tsig::TsigSigner;
use unidns::{
    Algorithm, Error, FormatError, HmacKey, Resolver, Session, TransferError, TsigState,
    ZoneTransfer,
};

type Responder = Arc<dyn Fn(&[u8]) -> io::Result<Option<Vec<u8>>> + Send + Sync>;

/// Transport events in the order they happened.
#[derive(Clone, Default)]
struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    fn push(&self, event: String) {
        self.0.lock().push(event);
    }

    fn count(&self, prefix: &str) -> usize {
        self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn all(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

struct StubDatagram {
    replies: Mutex<VecDeque<Responder>>,
    events: Events,
}

impl DatagramTransport for StubDatagram {
    fn send_recv(
        &self,
        _local: Option<SocketAddr>,
        _remote: SocketAddr,
        data: &[u8],
        _max_size: usize,
        _deadline: Deadline,
    ) -> io::Result<Vec<u8>> {
        self.events.push("datagram".into());
        let reply = self
            .replies
            .lock()
            .pop_front()
            .ok_or(io::ErrorKind::TimedOut)?;
        Ok(reply(data)?.unwrap_or_default())
    }
}

struct StubConnector {
    connections: Mutex<VecDeque<Responder>>,
    opened: AtomicUsize,
    events: Events,
}

struct StubConnection {
    id: usize,
    reply: Responder,
    sent: Vec<u8>,
    events: Events,
}

impl StreamConnection for StubConnection {
    fn set_deadline(&mut self, _deadline: Deadline) {}

    fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.events.push(format!("send {}", self.id));
        self.sent = data.to_vec();
        Ok(())
    }

    fn recv(&mut self) -> io::Result<Option<Vec<u8>>> {
        (self.reply)(&self.sent)
    }

    fn close(self) {
        self.events.push(format!("close {}", self.id));
    }
}

impl StreamConnector for StubConnector {
    type Connection = StubConnection;

    fn connect(
        &self,
        _local: Option<SocketAddr>,
        _remote: SocketAddr,
        _deadline: Deadline,
    ) -> io::Result<StubConnection> {
        let reply = self
            .connections
            .lock()
            .pop_front()
            .ok_or(io::ErrorKind::ConnectionRefused)?;
        let id = self.opened.fetch_add(1, Ordering::SeqCst) + 1;
        self.events.push(format!("connect {}", id));
        Ok(StubConnection {
            id,
            reply,
            sent: Vec::new(),
            events: self.events.clone(),
        })
    }
}

type StubResolver = Resolver<StubDatagram, StubConnector>;

fn server() -> SocketAddr {
    SocketAddr::from(([192, 0, 2, 53], 53))
}

fn stub_resolver(
    datagrams: Vec<Responder>,
    connections: Vec<Responder>,
    session: Option<Session<StubConnection>>,
) -> (StubResolver, Events) {
    let events = Events::default();
    let datagram = StubDatagram {
        replies: Mutex::new(datagrams.into()),
        events: events.clone(),
    };
    let stream = StubConnector {
        connections: Mutex::new(connections.into()),
        opened: AtomicUsize::new(0),
        events: events.clone(),
    };
    let mut resolver = Resolver::with_transports(server(), datagram, stream, session);
    resolver.set_timeout_secs(5);
    (resolver, events)
}

fn name() -> Name {
    Name::from_ascii("www.example.com").unwrap()
}

fn query() -> Message {
    let flags = HeaderFlags {
        rd: true,
        ..Default::default()
    };
    Message::new_query(name(), RecordType::A, Opcode::QUERY, flags, None).unwrap()
}

fn parse(raw: &[u8]) -> Message {
    Message::parse(&mut Cursor::new(raw)).unwrap()
}

/// An answer to `query` holding one `A` record.
fn response_to(query: &Message, tc: bool, id: u16) -> Message {
    let record = NonOptRecord::new(
        query.question().unwrap().qname.clone(),
        Class::IN,
        300,
        A {
            address: Ipv4Addr::new(192, 0, 2, 1),
        }
        .into(),
    );
    let flags = HeaderFlags {
        tc,
        ..Default::default()
    };
    Message::new_response(
        id,
        Opcode::QUERY,
        flags,
        RCode::NOERROR,
        query.questions.clone(),
        [vec![Record::NONOPT(record)], vec![], vec![]],
    )
}

fn answer(raw: &[u8], tc: bool, id_offset: u16) -> Vec<u8> {
    let query = parse(raw);
    response_to(&query, tc, query.id().wrapping_add(id_offset))
        .encode()
        .unwrap()
}

fn responder(
    reply: impl Fn(&[u8]) -> io::Result<Option<Vec<u8>>> + Send + Sync + 'static,
) -> Responder {
    Arc::new(reply)
}

fn reply() -> Responder {
    responder(|raw| Ok(Some(answer(raw, false, 0))))
}

fn truncated() -> Responder {
    responder(|raw| Ok(Some(answer(raw, true, 0))))
}

fn wrong_id() -> Responder {
    responder(|raw| Ok(Some(answer(raw, false, 1))))
}

fn fixed(bytes: &'static [u8]) -> Responder {
    responder(move |_| Ok(Some(bytes.to_vec())))
}

fn failing() -> Responder {
    responder(|_| Err(io::ErrorKind::ConnectionReset.into()))
}

#[test]
fn small_query_goes_over_datagram_first() {
    let (resolver, events) = stub_resolver(vec![reply()], vec![], None);
    let query = query();

    let res = resolver.send(&query).unwrap();
    assert_eq!(res.id(), query.id());
    assert_eq!(res.answers.len(), 1);
    assert_eq!(res.tsig_state, TsigState::Unverified);
    assert_eq!(events.all(), ["datagram"]);
}

#[test]
fn stream_only_never_uses_datagrams() {
    let (mut resolver, events) = stub_resolver(vec![reply()], vec![reply()], None);
    resolver.set_tcp(true);

    resolver.send(&query()).unwrap();
    assert_eq!(events.count("datagram"), 0);
    assert_eq!(events.all(), ["connect 1", "send 1", "close 1"]);
}

#[test]
fn oversized_query_goes_over_stream() {
    let (resolver, events) = stub_resolver(vec![reply()], vec![reply()], None);
    let mut query = query();
    let padding = NonOptRecord::new(
        name(),
        Class::IN,
        0,
        TXT {
            text: vec!["x".repeat(255); 3],
        }
        .into(),
    );
    query.push_additional(Record::NONOPT(padding));
    assert!(query.encode().unwrap().len() > unidns::DEFAULT_UDP_SIZE);

    resolver.send(&query).unwrap();
    assert_eq!(events.count("datagram"), 0);
    assert_eq!(events.count("connect"), 1);
}

#[test]
fn datagram_id_mismatch_is_resent() {
    let (resolver, events) = stub_resolver(vec![wrong_id(), wrong_id(), reply()], vec![], None);
    let query = query();

    let res = resolver.send(&query).unwrap();
    assert_eq!(res.id(), query.id());
    assert_eq!(events.count("datagram"), 3);
    assert_eq!(events.count("connect"), 0);
}

#[test]
fn datagram_mismatch_until_deadline_times_out() {
    // the stub times out once its script is exhausted, like a socket past the deadline
    let (resolver, _) = stub_resolver(vec![wrong_id(), wrong_id()], vec![], None);
    assert!(matches!(resolver.send(&query()), Err(Error::Timeout)));
}

#[test]
fn stream_id_mismatch_is_fatal() {
    let (mut resolver, events) = stub_resolver(vec![], vec![wrong_id(), reply()], None);
    resolver.set_tcp(true);
    let query = query();

    let err = resolver.send(&query).unwrap_err();
    match err {
        Error::Format(FormatError::IdMismatch { expected, got }) => {
            assert_eq!(expected, query.id());
            assert_eq!(got, query.id().wrapping_add(1));
        }
        e => panic!("unexpected error: {}", e),
    }
    assert_eq!(events.count("connect"), 1);
}

#[test]
fn truncation_escalates_to_stream_once() {
    // the stream response is truncated too, but there is no going back to datagrams
    let (resolver, events) = stub_resolver(vec![truncated(), reply()], vec![truncated()], None);

    let res = resolver.send(&query()).unwrap();
    assert!(res.header.flags.tc);
    assert_eq!(
        events.all(),
        ["datagram", "connect 1", "send 1", "close 1"]
    );
}

#[test]
fn truncation_can_be_ignored() {
    let (mut resolver, events) = stub_resolver(vec![truncated()], vec![reply()], None);
    resolver.set_ignore_truncation(true);

    let res = resolver.send(&query()).unwrap();
    assert!(res.header.flags.tc);
    assert_eq!(events.all(), ["datagram"]);
}

#[test]
fn cut_off_truncated_datagram_escalates() {
    let cut_off = responder(|raw| {
        let mut bytes = answer(raw, true, 0);
        bytes.truncate(bytes.len() - 6);
        Ok(Some(bytes))
    });
    let (resolver, events) = stub_resolver(vec![cut_off], vec![reply()], None);

    let res = resolver.send(&query()).unwrap();
    assert!(!res.header.flags.tc);
    assert_eq!(res.answers.len(), 1);
    assert_eq!(
        events.all(),
        ["datagram", "connect 1", "send 1", "close 1"]
    );
}

#[test]
fn empty_and_short_responses() {
    let (resolver, _) = stub_resolver(vec![fixed(b"")], vec![], None);
    assert!(matches!(
        resolver.send(&query()),
        Err(Error::NoResponse(addr)) if addr == server()
    ));

    let (resolver, _) = stub_resolver(vec![fixed(b"\x12\x34\x81")], vec![], None);
    assert!(matches!(
        resolver.send(&query()),
        Err(Error::Format(FormatError::TooShort(3)))
    ));
}

#[test]
fn successful_connections_are_pooled() {
    let session = Session::new();
    let (mut resolver, events) = stub_resolver(vec![], vec![reply()], Some(session.clone()));
    resolver.set_tcp(true);

    resolver.send(&query()).unwrap();
    resolver.send(&query()).unwrap();

    assert_eq!(events.all(), ["connect 1", "send 1", "send 1"]);
    let stats = session.pool().stats();
    assert_eq!((stats.created, stats.reused, stats.idle), (1, 1, 1));
}

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn resolvers_and_sessions_are_shareable() {
    assert_send_sync::<Resolver>();
    assert_send_sync::<Session<TcpConnection>>();
    assert_send_sync::<StubResolver>();
}

#[test]
fn concurrent_queries_share_the_pool() {
    const THREADS: usize = 4;
    const QUERIES: usize = 10;

    let session = Session::new();
    let connections = (0..THREADS * QUERIES).map(|_| reply()).collect();
    let (mut resolver, events) = stub_resolver(vec![], connections, Some(session.clone()));
    resolver.set_tcp(true);
    let resolver = Arc::new(resolver);

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let resolver = Arc::clone(&resolver);
            thread::spawn(move || {
                for _ in 0..QUERIES {
                    let query = query();
                    let res = resolver.send(&query).unwrap();
                    assert_eq!(res.id(), query.id());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let stats = session.pool().stats();
    assert_eq!(stats.created + stats.reused, (THREADS * QUERIES) as u64);
    // no thread opens a connection while another one sits idle
    assert!(stats.created as usize <= THREADS);
    // every connection went back to the pool exactly once
    assert_eq!((stats.idle as u64, stats.discarded), (stats.created, 0));

    let used: HashSet<_> = events
        .all()
        .into_iter()
        .filter(|e| e.starts_with("send "))
        .collect();
    assert_eq!(used.len() as u64, stats.created);
    assert_eq!(events.count("send "), THREADS * QUERIES);
    assert_eq!(events.count("close "), 0);
}

#[test]
fn recycling_can_be_disabled() {
    let session = Session::new();
    let (mut resolver, events) =
        stub_resolver(vec![], vec![reply(), reply()], Some(session.clone()));
    resolver.set_tcp(true);
    resolver.set_recycle_connections(false);

    resolver.send(&query()).unwrap();
    resolver.send(&query()).unwrap();

    assert_eq!(events.count("close"), 2);
    assert!(session.pool().is_empty());
}

#[test]
fn failed_connections_are_never_pooled() {
    let session = Session::new();
    let (mut resolver, events) =
        stub_resolver(vec![], vec![failing(), failing()], Some(session.clone()));
    resolver.set_tcp(true);

    assert!(matches!(
        resolver.send(&query()),
        Err(Error::NoResponse(_))
    ));
    assert_eq!(
        events.all(),
        ["connect 1", "send 1", "close 1", "connect 2", "send 2", "close 2"]
    );
    assert!(session.pool().is_empty());
}

#[test]
fn stale_pooled_connection_recovers() {
    let session = Session::new();
    let (mut resolver, events) = stub_resolver(vec![], vec![reply()], Some(session.clone()));
    resolver.set_tcp(true);
    session.pool().release(
        server(),
        StubConnection {
            id: 0,
            reply: responder(|_| Ok(None)),
            sent: Vec::new(),
            events: events.clone(),
        },
    );

    let res = resolver.send(&query()).unwrap();
    assert_eq!(res.answers.len(), 1);
    assert_eq!(
        events.all(),
        ["send 0", "close 0", "connect 1", "send 1"]
    );
    let stats = session.pool().stats();
    assert_eq!((stats.discarded, stats.idle), (1, 1));
}

fn key() -> HmacKey {
    HmacKey::new(
        Name::from_ascii("transfer.key").unwrap(),
        Algorithm::Sha256,
        b"very secret",
    )
    .unwrap()
}

#[test]
fn signed_responses_are_verified() {
    let server_key = key();
    let signed = responder(move |raw| {
        let query = parse(raw);
        let (_, request) = query.tsig().unwrap();
        let mut response = response_to(&query, false, query.id());
        server_key.sign_response(&mut response, request).unwrap();
        Ok(Some(response.encode().unwrap()))
    });
    let (mut resolver, _) = stub_resolver(vec![signed, reply()], vec![], None);
    resolver.set_tsig_key(Some(Arc::new(key())));

    let res = resolver.send(&query()).unwrap();
    assert_eq!(res.tsig_state, TsigState::Verified);

    // the second reply is unsigned
    let res = resolver.send(&query()).unwrap();
    assert_eq!(res.tsig_state, TsigState::Failed);
    assert_eq!(res.answers.len(), 1);
}

#[test]
fn echo_returns_the_augmented_query() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let seen = sent.clone();
    let echo = responder(move |raw| {
        *seen.lock() = raw.to_vec();
        Ok(Some(raw.to_vec()))
    });
    let (mut resolver, _) = stub_resolver(vec![echo], vec![], None);
    resolver.set_edns(0).unwrap();
    let key: Arc<dyn TsigSigner> = Arc::new(key());
    resolver.set_tsig_key(Some(key));

    let query = query();
    let res = resolver.send(&query).unwrap();

    assert_eq!(res.message, parse(&sent.lock()));
    assert_eq!(res.opt().unwrap().payload_size, 1280);
    assert!(res.tsig().is_some());
    // the caller's query is left as it was
    assert!(query.additional_answers.is_empty());
}

#[derive(Debug, Default)]
struct StubTransfer {
    timeouts: Mutex<Vec<Duration>>,
    refuse: bool,
}

impl ZoneTransfer for StubTransfer {
    fn transfer(
        &self,
        zone: &Name,
        _remote: SocketAddr,
        _key: Option<&dyn TsigSigner>,
        timeout: Duration,
    ) -> Result<Vec<NonOptRecord>, TransferError> {
        self.timeouts.lock().push(timeout);
        if self.refuse {
            return Err(TransferError::Refused(RCode::REFUSED));
        }
        let soa = NonOptRecord::new(
            zone.clone(),
            Class::IN,
            3600,
            SOA {
                mname: Name::from_ascii("ns.example.com").unwrap(),
                rname: Name::from_ascii("hostmaster.example.com").unwrap(),
                serial: 1,
                refresh: 7200,
                retry: 900,
                expire: 1209600,
                minimum: 300,
            }
            .into(),
        );
        let host = NonOptRecord::new(
            name(),
            Class::IN,
            3600,
            A {
                address: Ipv4Addr::new(192, 0, 2, 80),
            }
            .into(),
        );
        Ok(vec![soa.clone(), host, soa])
    }
}

#[test]
fn zone_transfer_is_one_response() {
    let transfer = Arc::new(StubTransfer::default());
    let (mut resolver, events) = stub_resolver(vec![], vec![], None);
    resolver.set_zone_transfer(transfer.clone());
    resolver.set_timeout(2, 900);

    let zone = Name::from_ascii("example.com").unwrap();
    let query =
        Message::new_query(zone, RecordType::AXFR, Opcode::QUERY, HeaderFlags::default(), None)
            .unwrap();
    let res = resolver.send(&query).unwrap();

    assert_eq!(res.id(), query.id());
    assert!(res.header.qr && res.header.flags.aa);
    assert_eq!(res.header.rcode, Some(RCode::NOERROR));
    assert_eq!(res.questions, query.questions);
    assert_eq!(res.answers.len(), 3);
    assert!(events.all().is_empty());

    // whole seconds, at least one
    resolver.set_timeout(0, 300);
    resolver.send(&query).unwrap();
    assert_eq!(
        *transfer.timeouts.lock(),
        [Duration::from_secs(2), Duration::from_secs(1)]
    );
}

#[test]
fn refused_zone_transfer_is_a_format_error() {
    let (mut resolver, _) = stub_resolver(vec![], vec![], None);
    resolver.set_zone_transfer(Arc::new(StubTransfer {
        refuse: true,
        ..Default::default()
    }));

    let zone = Name::from_ascii("example.com").unwrap();
    let query =
        Message::new_query(zone, RecordType::AXFR, Opcode::QUERY, HeaderFlags::default(), None)
            .unwrap();
    assert!(matches!(
        resolver.send(&query),
        Err(Error::Format(FormatError::Transfer(TransferError::Refused(
            RCode::REFUSED
        ))))
    ));
}

#[test]
fn udp_loopback() {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = socket.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let mut buf = [0; 512];
        let (len, peer) = socket.recv_from(&mut buf).unwrap();
        socket.send_to(&answer(&buf[..len], false, 0), peer).unwrap();
    });

    let resolver = Resolver::new(Some(&addr.to_string())).unwrap();
    let res = resolver.send(&query()).unwrap();
    handle.join().unwrap();

    assert_eq!(res.answers.len(), 1);
}

#[test]
fn tcp_loopback_reuses_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        for _ in 0..2 {
            let mut len = [0; 2];
            stream.read_exact(&mut len).unwrap();
            let mut raw = vec![0; u16::from_be_bytes(len) as usize];
            stream.read_exact(&mut raw).unwrap();
            let out = answer(&raw, false, 0);
            stream.write_all(&(out.len() as u16).to_be_bytes()).unwrap();
            stream.write_all(&out).unwrap();
        }
    });

    let session = Session::new();
    let mut resolver = Resolver::with_session(session.clone(), Some(&addr.to_string())).unwrap();
    resolver.set_tcp(true);
    resolver.set_timeout_secs(5);

    resolver.send(&query()).unwrap();
    resolver.send(&query()).unwrap();
    handle.join().unwrap();

    let stats = session.pool().stats();
    assert_eq!((stats.created, stats.reused, stats.idle), (1, 1, 1));
    session.pool().clear();
}
