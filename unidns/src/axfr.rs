//! Full zone transfers. [\[RFC 5936\]](https://www.rfc-editor.org/rfc/rfc5936)

use std::fmt::Debug;
use std::io::{self, Cursor};
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use unidns_proto::error::{EncodeError, ParseError};
use unidns_proto::rdata::TSIG;
use unidns_proto::{HeaderFlags, Message, Name, NonOptRecord, Opcode, RCode, RecordType};

use crate::net::{Deadline, StreamConnection, StreamConnector, TcpConnector};
use crate::tsig::{TsigError, TsigSigner};

/// Why a zone transfer failed.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),

    #[error("server closed the connection before the transfer was complete")]
    Closed,

    #[error("could not encode the transfer query: {0}")]
    Encode(#[from] EncodeError),

    #[error("could not parse a transfer message: {0}")]
    Parse(#[from] ParseError),

    #[error("transfer message id {got} does not match query id {expected}")]
    IdMismatch { expected: u16, got: u16 },

    #[error("server refused the transfer with {0}")]
    Refused(RCode),

    #[error("transfer does not start with the zone's SOA record")]
    MissingSoa,

    #[error("transfer signature rejected: {0}")]
    BadSignature(#[source] TsigError),
}

/// Something that can fetch every record of a zone.
pub trait ZoneTransfer: Debug + Send + Sync {
    /// Transfers `zone` from `remote`, signing with `key` if given, within `timeout`.
    ///
    /// The records are returned in transfer order, starting and ending with the zone's `SOA`.
    fn transfer(
        &self,
        zone: &Name,
        remote: SocketAddr,
        key: Option<&dyn TsigSigner>,
        timeout: Duration,
    ) -> Result<Vec<NonOptRecord>, TransferError>;
}

/// [`ZoneTransfer`] sending an `AXFR` query over a dedicated stream connection.
#[derive(Clone, Debug, Default)]
pub struct AxfrClient<S = TcpConnector> {
    connector: S,
}

impl<S: StreamConnector + Debug> AxfrClient<S> {
    pub fn new(connector: S) -> Self {
        Self { connector }
    }

    fn receive_zone(
        &self,
        conn: &mut S::Connection,
        query: &Message,
        key: Option<&dyn TsigSigner>,
    ) -> Result<Vec<NonOptRecord>, TransferError> {
        let mut signatures = key.map(|key| SignatureChain::new(key, query));
        let mut records: Vec<NonOptRecord> = Vec::new();
        let mut soa_seen = 0;
        let mut message_count = 0usize;

        loop {
            let raw = conn.recv()?.ok_or(TransferError::Closed)?;
            let msg = Message::parse(&mut Cursor::new(&raw[..]))?;
            if msg.id() != query.id() {
                return Err(TransferError::IdMismatch {
                    expected: query.id(),
                    got: msg.id(),
                });
            }
            match msg.header.rcode {
                Some(RCode::NOERROR) | None => (),
                Some(rcode) => return Err(TransferError::Refused(rcode)),
            }
            if let Some(chain) = &mut signatures {
                chain.check(&msg, &raw)?;
            }
            message_count += 1;
            debug!(message_count, answers = msg.answers.len(), "received transfer message");

            for record in msg.answers.into_iter().filter_map(|r| r.into_nonopt()) {
                let is_soa = record.rtype == RecordType::SOA;
                if records.is_empty() && !is_soa {
                    return Err(TransferError::MissingSoa);
                }
                records.push(record);
                if is_soa {
                    soa_seen += 1;
                    if soa_seen == 2 {
                        if let Some(chain) = &signatures {
                            chain.finish()?;
                        }
                        return Ok(records);
                    }
                }
            }
            if records.is_empty() {
                return Err(TransferError::MissingSoa);
            }
        }
    }
}

/// Tracks the signatures of a transfer's messages.
///
/// The first message must be signed. Later ones may go unsigned, up to
/// [`MAX_UNSIGNED`](Self::MAX_UNSIGNED) in a row, and each signed one covers those since the
/// previous signature. The last message must be signed.
struct SignatureChain<'a> {
    key: &'a dyn TsigSigner,
    request: Option<TSIG>,
    prior_mac: Option<Vec<u8>>,
    unsigned: Vec<u8>,
    unsigned_count: usize,
}

impl<'a> SignatureChain<'a> {
    const MAX_UNSIGNED: usize = 99;

    fn new(key: &'a dyn TsigSigner, query: &Message) -> Self {
        Self {
            key,
            request: query.tsig().map(|(_, tsig)| tsig.clone()),
            prior_mac: None,
            unsigned: Vec::new(),
            unsigned_count: 0,
        }
    }

    fn check(&mut self, msg: &Message, raw: &[u8]) -> Result<(), TransferError> {
        let Some(prior_mac) = &self.prior_mac else {
            self.key
                .verify(msg, raw, self.request.as_ref())
                .map_err(TransferError::BadSignature)?;
            return self.advance(msg);
        };

        if msg.tsig().is_none() {
            self.unsigned_count += 1;
            if self.unsigned_count > Self::MAX_UNSIGNED {
                return Err(TransferError::BadSignature(TsigError::Unsigned));
            }
            self.unsigned.extend_from_slice(raw);
            return Ok(());
        }
        self.key
            .verify_continuation(msg, raw, prior_mac, &self.unsigned)
            .map_err(TransferError::BadSignature)?;
        self.advance(msg)
    }

    fn advance(&mut self, msg: &Message) -> Result<(), TransferError> {
        let (_, tsig) = msg
            .tsig()
            .ok_or(TransferError::BadSignature(TsigError::Unsigned))?;
        self.prior_mac = Some(tsig.mac.clone());
        self.unsigned.clear();
        self.unsigned_count = 0;
        Ok(())
    }

    fn finish(&self) -> Result<(), TransferError> {
        if self.unsigned_count > 0 {
            return Err(TransferError::BadSignature(TsigError::Unsigned));
        }
        Ok(())
    }
}

impl<S: StreamConnector + Debug> ZoneTransfer for AxfrClient<S> {
    fn transfer(
        &self,
        zone: &Name,
        remote: SocketAddr,
        key: Option<&dyn TsigSigner>,
        timeout: Duration,
    ) -> Result<Vec<NonOptRecord>, TransferError> {
        let mut query = Message::new_query(
            zone.clone(),
            RecordType::AXFR,
            Opcode::QUERY,
            HeaderFlags::default(),
            None,
        )?;
        if let Some(key) = key {
            key.sign(&mut query)?;
        }
        let data = query.encode()?;

        let mut conn = self
            .connector
            .connect(None, remote, Deadline::after(timeout))?;
        let result = conn
            .send(&data)
            .map_err(TransferError::from)
            .and_then(|()| self.receive_zone(&mut conn, &query, key));
        conn.close();

        match &result {
            Ok(records) => debug!(%zone, %remote, records = records.len(), "zone transfer done"),
            Err(e) => warn!(%zone, %remote, error = %e, "zone transfer failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, TcpListener};
    use std::thread;

    use unidns_proto::rdata::{A, SOA};
    use unidns_proto::{Class, Record};

    use super::*;
    use crate::tsig::{Algorithm, HmacKey};

    fn zone() -> Name {
        Name::from_ascii("example.com").unwrap()
    }

    fn soa() -> NonOptRecord {
        NonOptRecord::new(
            zone(),
            Class::IN,
            3600,
            SOA {
                mname: Name::from_ascii("ns.example.com").unwrap(),
                rname: Name::from_ascii("hostmaster.example.com").unwrap(),
                serial: 2024010101,
                refresh: 7200,
                retry: 900,
                expire: 1209600,
                minimum: 300,
            }
            .into(),
        )
    }

    fn host(name: &str, last_octet: u8) -> NonOptRecord {
        NonOptRecord::new(
            Name::from_ascii(name).unwrap(),
            Class::IN,
            3600,
            A {
                address: Ipv4Addr::new(192, 0, 2, last_octet),
            }
            .into(),
        )
    }

    /// Serves one transfer, sending each batch of records as its own message.
    fn serve(
        batches: Vec<Vec<NonOptRecord>>,
        rcode: RCode,
    ) -> (SocketAddr, thread::JoinHandle<()>) {
        serve_signed(batches, rcode, None, None)
    }

    /// Like [`serve()`], but signs the first `signed` messages with the key, if given, and flips
    /// a header bit of message `tampered` after signing it.
    fn serve_signed(
        batches: Vec<Vec<NonOptRecord>>,
        rcode: RCode,
        signer: Option<(HmacKey, usize)>,
        tampered: Option<usize>,
    ) -> (SocketAddr, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut len = [0; 2];
            stream.read_exact(&mut len).unwrap();
            let mut raw = vec![0; u16::from_be_bytes(len) as usize];
            stream.read_exact(&mut raw).unwrap();
            let query = Message::parse(&mut Cursor::new(&raw[..])).unwrap();
            assert_eq!(query.question().unwrap().qtype, RecordType::AXFR);

            let mut prior_mac: Option<Vec<u8>> = None;
            for (idx, batch) in batches.into_iter().enumerate() {
                let answers = batch.into_iter().map(Record::NONOPT).collect();
                let mut msg = Message::new_response(
                    query.id(),
                    Opcode::QUERY,
                    HeaderFlags::default(),
                    rcode,
                    query.questions.clone(),
                    [answers, vec![], vec![]],
                );
                if let Some((key, signed)) = &signer {
                    if idx < *signed {
                        match &prior_mac {
                            None => key.sign_response(&mut msg, query.tsig().unwrap().1),
                            Some(mac) => key.sign_continuation(&mut msg, mac, &[]),
                        }
                        .unwrap();
                        prior_mac = Some(msg.tsig().unwrap().1.mac.clone());
                    }
                }
                let mut out = msg.encode().unwrap();
                if tampered == Some(idx) {
                    out[2] ^= 1;
                }
                stream.write_all(&(out.len() as u16).to_be_bytes()).unwrap();
                stream.write_all(&out).unwrap();
            }
        });
        (addr, handle)
    }

    fn key() -> HmacKey {
        HmacKey::new(Name::from_ascii("transfer.key").unwrap(), Algorithm::Sha256, b"zone").unwrap()
    }

    fn two_messages() -> Vec<Vec<NonOptRecord>> {
        vec![
            vec![soa(), host("a.example.com", 1)],
            vec![host("b.example.com", 2), soa()],
        ]
    }

    fn signed_transfer(
        signed: usize,
        tampered: Option<usize>,
    ) -> Result<Vec<NonOptRecord>, TransferError> {
        let (addr, handle) =
            serve_signed(two_messages(), RCode::NOERROR, Some((key(), signed)), tampered);
        let key = key();
        let res = AxfrClient::new(TcpConnector).transfer(
            &zone(),
            addr,
            Some(&key as &dyn TsigSigner),
            Duration::from_secs(5),
        );
        handle.join().unwrap();
        res
    }

    #[test]
    fn transfer_spanning_messages() {
        let (addr, handle) = serve(
            vec![
                vec![soa(), host("a.example.com", 1)],
                vec![host("b.example.com", 2), soa()],
            ],
            RCode::NOERROR,
        );

        let records = AxfrClient::new(TcpConnector)
            .transfer(&zone(), addr, None, Duration::from_secs(5))
            .unwrap();
        handle.join().unwrap();

        let types: Vec<_> = records.iter().map(|r| r.rtype).collect();
        assert_eq!(
            types,
            [RecordType::SOA, RecordType::A, RecordType::A, RecordType::SOA]
        );
    }

    #[test]
    fn refused_transfer() {
        let (addr, handle) = serve(vec![vec![]], RCode::REFUSED);
        let err = AxfrClient::new(TcpConnector)
            .transfer(&zone(), addr, None, Duration::from_secs(5))
            .unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, TransferError::Refused(RCode::REFUSED)));
    }

    #[test]
    fn transfer_must_start_with_soa() {
        let (addr, handle) = serve(vec![vec![host("a.example.com", 1)]], RCode::NOERROR);
        let err = AxfrClient::new(TcpConnector)
            .transfer(&zone(), addr, None, Duration::from_secs(5))
            .unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, TransferError::MissingSoa));
    }

    #[test]
    fn early_close_is_reported() {
        let (addr, handle) = serve(vec![vec![soa(), host("a.example.com", 1)]], RCode::NOERROR);
        let err = AxfrClient::new(TcpConnector)
            .transfer(&zone(), addr, None, Duration::from_secs(5))
            .unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, TransferError::Closed));
    }

    #[test]
    fn signed_transfer_is_verified() {
        let records = signed_transfer(2, None).unwrap();
        assert_eq!(records.len(), 4);
    }

    #[test]
    fn tampered_later_message_is_rejected() {
        let err = signed_transfer(2, Some(1)).unwrap_err();
        assert!(matches!(
            err,
            TransferError::BadSignature(TsigError::BadSignature)
        ));
    }

    #[test]
    fn unsigned_last_message_is_rejected() {
        let err = signed_transfer(1, None).unwrap_err();
        assert!(matches!(err, TransferError::BadSignature(TsigError::Unsigned)));
    }
}
