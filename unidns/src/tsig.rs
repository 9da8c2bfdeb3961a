//! Transaction signatures. [\[RFC 8945\]](https://www.rfc-editor.org/rfc/rfc8945)
//!
//! A [`TsigSigner`] appends a `TSIG` record to outgoing queries and checks the one on the
//! response. [`HmacKey`] implements it with a shared secret.

use std::fmt::{self, Debug, Display};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{NetworkEndian, WriteBytesExt};
use ring::hmac;
use thiserror::Error;
use unidns_proto::error::{EncodeError, ParseError};
use unidns_proto::rdata::TSIG;
use unidns_proto::{Class, Message, Name, NonOptRecord, Record};

/// The outcome of checking a response's signature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TsigState {
    /// No key is configured, so nothing was checked.
    #[default]
    Unverified,
    Verified,
    Failed,
}

/// Why a signature was rejected.
#[derive(Debug, Error)]
pub enum TsigError {
    #[error("message is not signed")]
    Unsigned,

    #[error("message is signed with key {0}")]
    UnknownKey(Name),

    #[error("message is signed with algorithm {0}")]
    UnknownAlgorithm(Name),

    #[error("server reported TSIG error {0}")]
    ServerError(u16),

    #[error("signature does not match")]
    BadSignature,

    #[error("signed at {time_signed}, but it is {now} and the fudge is {fudge}s")]
    BadTime { time_signed: u64, now: u64, fudge: u16 },

    #[error("could not locate signature: {0}")]
    Parse(#[from] ParseError),

    #[error("could not rebuild signed data: {0}")]
    Encode(#[from] EncodeError),
}

/// Something that can sign queries and verify responses.
pub trait TsigSigner: Debug + Send + Sync {
    /// The key name, used as the owner of the `TSIG` record.
    fn name(&self) -> &Name;

    /// Signs `msg`, appending the `TSIG` record as its last additional record.
    fn sign(&self, msg: &mut Message) -> Result<(), EncodeError>;

    /// Verifies the signature of `msg`, which was parsed from `raw`.
    ///
    /// For a response, `request` is the `TSIG` RDATA of the signed query.
    fn verify(&self, msg: &Message, raw: &[u8], request: Option<&TSIG>) -> Result<(), TsigError>;

    /// Verifies a later signed message of a multi-message response, such as a zone transfer.
    /// [\[RFC 8945, Section 5.3.1\]](https://www.rfc-editor.org/rfc/rfc8945#section-5.3.1)
    ///
    /// `prior_mac` is the MAC of the previous signed message. `unsigned` holds the raw messages
    /// received in between without a signature, concatenated in order.
    fn verify_continuation(
        &self,
        msg: &Message,
        raw: &[u8],
        prior_mac: &[u8],
        unsigned: &[u8],
    ) -> Result<(), TsigError>;
}

/// The HMAC algorithms of [RFC 8945, Section 6](https://www.rfc-editor.org/rfc/rfc8945#section-6)
/// that `ring` provides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Algorithm {
    Sha1,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    /// The algorithm name as it appears in the `TSIG` record.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha1 => "hmac-sha1",
            Algorithm::Sha256 => "hmac-sha256",
            Algorithm::Sha384 => "hmac-sha384",
            Algorithm::Sha512 => "hmac-sha512",
        }
    }

    fn ring_algorithm(&self) -> hmac::Algorithm {
        match self {
            Algorithm::Sha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Algorithm::Sha256 => hmac::HMAC_SHA256,
            Algorithm::Sha384 => hmac::HMAC_SHA384,
            Algorithm::Sha512 => hmac::HMAC_SHA512,
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end_matches('.').to_ascii_lowercase();
        match s.strip_prefix("hmac-").unwrap_or(&s) {
            "sha1" => Ok(Algorithm::Sha1),
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            _ => Err(format!("Unsupported TSIG algorithm: {}.", s)),
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A named HMAC key shared with the server.
#[derive(Clone)]
pub struct HmacKey {
    name: Name,
    algorithm: Algorithm,
    algorithm_name: Name,
    key: hmac::Key,
    fudge: u16,
}

impl HmacKey {
    /// The permitted clock skew suggested by RFC 8945.
    pub const DEFAULT_FUDGE: u16 = 300;

    pub fn new(name: Name, algorithm: Algorithm, secret: &[u8]) -> Result<Self, ParseError> {
        Ok(Self {
            name,
            algorithm,
            algorithm_name: Name::from_ascii(algorithm.name())?,
            key: hmac::Key::new(algorithm.ring_algorithm(), secret),
            fudge: Self::DEFAULT_FUDGE,
        })
    }

    pub fn with_fudge(mut self, fudge: u16) -> Self {
        self.fudge = fudge;
        self
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Signs a response to a query that carried `request`. This is what a server does; it is
    /// exposed for testing against local servers.
    pub fn sign_response(&self, msg: &mut Message, request: &TSIG) -> Result<(), EncodeError> {
        self.sign_with(msg, Some(&request.mac), now())
    }

    /// Signs a later message of a multi-message response, chaining it to `prior_mac`. Like
    /// [`sign_response()`](Self::sign_response()), this is the server side.
    pub fn sign_continuation(
        &self,
        msg: &mut Message,
        prior_mac: &[u8],
        unsigned: &[u8],
    ) -> Result<(), EncodeError> {
        msg.pop_tsig();
        let time_signed = now();

        let mut data = Vec::new();
        write_request_mac(&mut data, Some(prior_mac))?;
        data.extend_from_slice(unsigned);
        data.extend_from_slice(&msg.encode()?);
        write_timers(&mut data, time_signed, self.fudge)?;
        let mac = hmac::sign(&self.key, &data);

        self.push_tsig(msg, time_signed, mac.as_ref().to_vec());
        Ok(())
    }

    fn sign_with(
        &self,
        msg: &mut Message,
        request_mac: Option<&[u8]>,
        time_signed: u64,
    ) -> Result<(), EncodeError> {
        msg.pop_tsig();

        let mut data = Vec::new();
        write_request_mac(&mut data, request_mac)?;
        data.extend_from_slice(&msg.encode()?);
        self.write_variables(&mut data, time_signed, self.fudge, 0, &[])?;
        let mac = hmac::sign(&self.key, &data);

        self.push_tsig(msg, time_signed, mac.as_ref().to_vec());
        Ok(())
    }

    fn push_tsig(&self, msg: &mut Message, time_signed: u64, mac: Vec<u8>) {
        let tsig = TSIG {
            algorithm: self.algorithm_name.clone(),
            time_signed,
            fudge: self.fudge,
            mac,
            original_id: msg.id(),
            error: 0,
            other: Vec::new(),
        };
        msg.push_additional(Record::NONOPT(NonOptRecord::new(
            self.name.clone(),
            Class::ANY,
            0,
            tsig.into(),
        )));
    }

    /// Checks the key, algorithm and error of the signature on `msg` and returns it.
    fn signature<'a>(&self, msg: &'a Message) -> Result<&'a TSIG, TsigError> {
        let (key_name, tsig) = msg.tsig().ok_or(TsigError::Unsigned)?;
        if *key_name != self.name {
            return Err(TsigError::UnknownKey(key_name.clone()));
        }
        if tsig.algorithm != self.algorithm_name {
            return Err(TsigError::UnknownAlgorithm(tsig.algorithm.clone()));
        }
        if tsig.error != 0 {
            return Err(TsigError::ServerError(tsig.error));
        }
        Ok(tsig)
    }

    /// Appends the TSIG variables of
    /// [RFC 8945, Section 4.3.3](https://www.rfc-editor.org/rfc/rfc8945#section-4.3.3).
    fn write_variables(
        &self,
        data: &mut Vec<u8>,
        time_signed: u64,
        fudge: u16,
        error: u16,
        other: &[u8],
    ) -> Result<(), EncodeError> {
        self.name.encode_canonical_into(data)?;
        data.write_u16::<NetworkEndian>(Class::ANY.encode())?;
        data.write_u32::<NetworkEndian>(0)?;
        self.algorithm_name.encode_canonical_into(data)?;
        write_timers(data, time_signed, fudge)?;
        data.write_u16::<NetworkEndian>(error)?;
        data.write_u16::<NetworkEndian>(other.len() as u16)?;
        data.extend_from_slice(other);
        Ok(())
    }
}

impl TsigSigner for HmacKey {
    fn name(&self) -> &Name {
        &self.name
    }

    fn sign(&self, msg: &mut Message) -> Result<(), EncodeError> {
        self.sign_with(msg, None, now())
    }

    fn verify(&self, msg: &Message, raw: &[u8], request: Option<&TSIG>) -> Result<(), TsigError> {
        let tsig = self.signature(msg)?;

        let mut data = Vec::new();
        write_request_mac(&mut data, request.map(|r| r.mac.as_slice()))?;
        data.extend_from_slice(&unsigned_message(raw, tsig)?);
        self.write_variables(&mut data, tsig.time_signed, tsig.fudge, tsig.error, &tsig.other)?;
        hmac::verify(&self.key, &data, &tsig.mac).map_err(|_| TsigError::BadSignature)?;

        check_time(tsig)
    }

    fn verify_continuation(
        &self,
        msg: &Message,
        raw: &[u8],
        prior_mac: &[u8],
        unsigned: &[u8],
    ) -> Result<(), TsigError> {
        let tsig = self.signature(msg)?;

        let mut data = Vec::new();
        write_request_mac(&mut data, Some(prior_mac))?;
        data.extend_from_slice(unsigned);
        data.extend_from_slice(&unsigned_message(raw, tsig)?);
        write_timers(&mut data, tsig.time_signed, tsig.fudge)?;
        hmac::verify(&self.key, &data, &tsig.mac).map_err(|_| TsigError::BadSignature)?;

        check_time(tsig)
    }
}

impl Debug for HmacKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HmacKey")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("fudge", &self.fudge)
            .finish_non_exhaustive()
    }
}

fn write_request_mac(data: &mut Vec<u8>, request_mac: Option<&[u8]>) -> Result<(), EncodeError> {
    if let Some(mac) = request_mac {
        data.write_u16::<NetworkEndian>(mac.len() as u16)?;
        data.extend_from_slice(mac);
    }
    Ok(())
}

/// Returns `raw` as it was before `tsig` was appended: without the record, with the original id
/// and one additional record less.
fn unsigned_message(raw: &[u8], tsig: &TSIG) -> Result<Vec<u8>, TsigError> {
    let offset = Message::tsig_offset(raw)?.ok_or(TsigError::Unsigned)?;
    let mut unsigned = raw[..offset].to_vec();
    unsigned[..2].copy_from_slice(&tsig.original_id.to_be_bytes());
    let arcount = u16::from_be_bytes([unsigned[10], unsigned[11]]).saturating_sub(1);
    unsigned[10..12].copy_from_slice(&arcount.to_be_bytes());
    Ok(unsigned)
}

fn write_timers(data: &mut Vec<u8>, time_signed: u64, fudge: u16) -> Result<(), EncodeError> {
    data.write_u48::<NetworkEndian>(time_signed & 0xFFFF_FFFF_FFFF)?;
    data.write_u16::<NetworkEndian>(fudge)?;
    Ok(())
}

fn check_time(tsig: &TSIG) -> Result<(), TsigError> {
    let now = now();
    if now.abs_diff(tsig.time_signed) > tsig.fudge as u64 {
        return Err(TsigError::BadTime {
            time_signed: tsig.time_signed,
            now,
            fudge: tsig.fudge,
        });
    }
    Ok(())
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use unidns_proto::{HeaderFlags, Message, Name, Opcode, RCode, RecordType};

    use super::*;

    fn key(secret: &[u8]) -> HmacKey {
        HmacKey::new(Name::from_ascii("transfer.key").unwrap(), Algorithm::Sha256, secret).unwrap()
    }

    fn query() -> Message {
        Message::new_query(
            Name::from_ascii("example.com").unwrap(),
            RecordType::SOA,
            Opcode::QUERY,
            HeaderFlags::default(),
            None,
        )
        .unwrap()
    }

    fn reparse(msg: &Message) -> (Message, Vec<u8>) {
        let raw = msg.encode().unwrap();
        (Message::parse(&mut Cursor::new(&raw[..])).unwrap(), raw)
    }

    #[test]
    fn signed_query_verifies() {
        let key = key(b"secret");
        let mut msg = query();
        key.sign(&mut msg).unwrap();
        assert_eq!(msg.header.arcount, 1);

        let (parsed, raw) = reparse(&msg);
        key.verify(&parsed, &raw, None).unwrap();
    }

    #[test]
    fn signed_response_verifies_against_request() {
        let key = key(b"secret");
        let mut request = query();
        key.sign(&mut request).unwrap();
        let (_, request_tsig) = request.tsig().unwrap();
        let request_tsig = request_tsig.clone();

        let mut response = Message::new_response(
            request.id(),
            Opcode::QUERY,
            HeaderFlags::default(),
            RCode::NOERROR,
            request.questions.clone(),
            [vec![], vec![], vec![]],
        );
        key.sign_response(&mut response, &request_tsig).unwrap();

        let (parsed, raw) = reparse(&response);
        key.verify(&parsed, &raw, Some(&request_tsig)).unwrap();
        // without the request MAC the signed data differs
        assert!(matches!(
            key.verify(&parsed, &raw, None),
            Err(TsigError::BadSignature)
        ));
    }

    #[test]
    fn tampering_is_detected() {
        let key = key(b"secret");
        let mut msg = query();
        key.sign(&mut msg).unwrap();
        let (_, mut raw) = reparse(&msg);
        // flip the RD bit
        raw[2] ^= 1;
        let parsed = Message::parse(&mut Cursor::new(&raw[..])).unwrap();

        assert!(matches!(
            key.verify(&parsed, &raw, None),
            Err(TsigError::BadSignature)
        ));
    }

    #[test]
    fn wrong_secret_or_missing_signature() {
        let mut msg = query();
        key(b"secret").sign(&mut msg).unwrap();
        let (parsed, raw) = reparse(&msg);
        assert!(matches!(
            key(b"other").verify(&parsed, &raw, None),
            Err(TsigError::BadSignature)
        ));

        let (unsigned, raw) = reparse(&query());
        assert!(matches!(
            key(b"secret").verify(&unsigned, &raw, None),
            Err(TsigError::Unsigned)
        ));
    }

    #[test]
    fn stale_signature_is_rejected() {
        let key = key(b"secret");
        let mut msg = query();
        key.sign_with(&mut msg, None, now() - 3600).unwrap();
        let (parsed, raw) = reparse(&msg);
        assert!(matches!(
            key.verify(&parsed, &raw, None),
            Err(TsigError::BadTime { .. })
        ));
    }

    #[test]
    fn server_fudge_is_honoured() {
        let server = key(b"secret").with_fudge(600);
        let mut msg = query();
        server.sign(&mut msg).unwrap();
        let (parsed, raw) = reparse(&msg);
        assert_eq!(parsed.tsig().unwrap().1.fudge, 600);

        key(b"secret").verify(&parsed, &raw, None).unwrap();
    }

    #[test]
    fn continuation_chains_to_prior_mac() {
        let key = key(b"secret");
        let prior_mac = vec![0xAB; 32];
        let (between, between_raw) = reparse(&query());
        assert!(between.tsig().is_none());

        let mut msg = query();
        key.sign_continuation(&mut msg, &prior_mac, &between_raw).unwrap();
        let (parsed, mut raw) = reparse(&msg);
        key.verify_continuation(&parsed, &raw, &prior_mac, &between_raw)
            .unwrap();

        // a different chain does not verify
        assert!(matches!(
            key.verify_continuation(&parsed, &raw, &[0xCD; 32], &between_raw),
            Err(TsigError::BadSignature)
        ));
        assert!(matches!(
            key.verify_continuation(&parsed, &raw, &prior_mac, &[]),
            Err(TsigError::BadSignature)
        ));

        raw[2] ^= 1;
        let tampered = Message::parse(&mut Cursor::new(&raw[..])).unwrap();
        assert!(matches!(
            key.verify_continuation(&tampered, &raw, &prior_mac, &between_raw),
            Err(TsigError::BadSignature)
        ));
    }

    #[test]
    fn algorithm_names() {
        assert_eq!("hmac-sha512".parse::<Algorithm>(), Ok(Algorithm::Sha512));
        assert_eq!("SHA1".parse::<Algorithm>(), Ok(Algorithm::Sha1));
        assert!("hmac-md5".parse::<Algorithm>().is_err());
    }
}
