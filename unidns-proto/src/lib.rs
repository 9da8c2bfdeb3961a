//! `unidns-proto` provides the definition of the DNS protocol's data types as well as the means to
//! de-/serialize them from/to the wire format. In simpler terms, you can construct, encode, and
//! decode DNS queries and responses with it.
//!
//! It is the codec underneath [`unidns`], a single-server DNS query engine, but you can use this
//! library on its own as well.
//!
//! # Basic usage example
//! ```rust
//! use std::io::Cursor;
//! use unidns_proto::{EdnsConfig, HeaderFlags, Message, Name, Opcode, RecordType};
//!
//! let flags = HeaderFlags { aa: false, tc: false, rd: true, ra: false, ad: false, cd: false };
//! let msg = Message::new_query(
//!     Name::from_ascii("example.com").unwrap(),
//!     RecordType::A,
//!     Opcode::QUERY,
//!     flags,
//!     Some(&EdnsConfig::default()),
//! ).unwrap();
//! let encoded = msg.encode().unwrap();
//!
//! let parsed = Message::parse(&mut Cursor::new(&encoded[..])).unwrap();
//! assert_eq!(parsed.opt().map(|opt| opt.payload_size), Some(1280));
//! ```
//!
//! # Usage note
//! You can construct most structs directly, without using any `new()` method. The record counts in
//! a [`Header`] are informational for constructed messages: [`Message::encode()`] always writes
//! the actual section lengths.
//!
//! [`unidns`]: https://docs.rs/unidns

use std::cmp::max;
use std::fmt::{self, Display};
use std::io::{Cursor, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use owo_colors::OwoColorize;
use rand::Rng;
use repr_with_fallback::repr_with_fallback;
#[cfg(feature = "serde")]
use serde::Serialize;
use strum_macros::EnumString;

pub mod error;
pub mod name;
pub mod rdata;

use error::{EncodeError, ParseError};
use rdata::{EdnsOption, RdataTrait, OPT, TSIG};

pub use name::Name;
pub use rdata::Rdata;

/// Represents a DNS OpCode.
///
/// See [here](https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-5) for
/// further information.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Opcode {
    QUERY,
    IQUERY,
    STATUS,
    NOTIFY,
    UPDATE,
    DSO,
}

/// Represents a DNS RCODE, including those introduced by EDNS and TSIG.
///
/// See
/// [here](https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-6)
/// for further information.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum RCode {
    NOERROR,
    FORMERR,
    SERVFAIL,
    NXDOMAIN,
    NOTIMP,
    REFUSED,
    YXDOMAIN,
    YXRRSET,
    NXRRSET,
    NOTAUTH,
    NOTZONE,
    DSOTYPENI,
    BADVERSBADSIG,
    BADKEY,
    BADTIME,
    BADMODE,
    BADNAME,
    BADALG,
    BADTRUNC,
    BADCOOKIE,
    Unknown(u16),
}

repr_with_fallback! {
    /// Represents a DNS TYPE.
    ///
    /// Types without a dedicated representation in the [`rdata`] module are carried as
    /// [`Rdata::Unknown`].
    #[cfg_attr(feature = "serde", derive(Serialize))]
    #[derive(PartialEq, Eq, Copy, Clone, EnumString, Debug)]
    #[non_exhaustive]
    pub enum RecordType {
        A = 1,
        NS = 2,
        CNAME = 5,
        SOA = 6,
        PTR = 12,
        MX = 15,
        TXT = 16,
        AAAA = 28,
        SRV = 33,
        OPT = 41,
        DS = 43,
        RRSIG = 46,
        NSEC = 47,
        DNSKEY = 48,
        TSIG = 250,
        IXFR = 251,
        AXFR = 252,
        ANY = 255,
        Unknown(u16),
    }
}

/// Represents a DNS CLASS.
///
/// Other classes than `IN` and `ANY` are included only for completeness and historical reasons.
///
/// See [RFC 1035](https://www.rfc-editor.org/rfc/rfc1035) for further information.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Class {
    IN,
    CH,
    HS,
    NONE,
    /// Also the class of every `TSIG` record.
    ANY,
}

/// Represents the flags of a [`Header`].
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub struct HeaderFlags {
    /// authoritative answer (valid in responses only)
    /// [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
    pub aa: bool,
    /// truncated (set on all truncated messages except last one)
    /// [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
    pub tc: bool,
    /// recursion desired (copied in answer if supported and accepted)
    /// [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
    pub rd: bool,
    /// valid in responses, indicating recursive query support in the name server
    /// [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
    pub ra: bool,
    /// authentic data [\[RFC 4035\]](https://www.rfc-editor.org/rfc/rfc4035)
    pub ad: bool,
    /// checking disabled [\[RFC 4035\]](https://www.rfc-editor.org/rfc/rfc4035)
    pub cd: bool,
}

/// Represents a DNS header.
///
/// The general format of a header is defined in [RFC 1035](https://www.rfc-editor.org/rfc/rfc1035).
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Header {
    /// Supplied by questioner and reflected back unchanged by responder.
    pub msg_id: u16,
    /// False for queries, true for responses.
    pub qr: bool,
    /// The [`Opcode`] of the message.
    pub opcode: Opcode,
    /// The [`HeaderFlags`] of the message.
    pub flags: HeaderFlags,
    /// For queries: [`None`]. For responses: the return/status code of the server.
    pub rcode: Option<RCode>,
    /// The number of questions.
    pub qdcount: u16,
    /// The number of resource records.
    pub ancount: u16,
    /// The number of name server resource records.
    pub nscount: u16,
    /// The number of additional resource records.
    pub arcount: u16,
}

/// Represents a DNS question, i.e. an entry in the question section of a DNS message.
///
/// See [RFC 1035](https://www.rfc-editor.org/rfc/rfc1035) for further information.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Question {
    /// The [`Name`] to query for.
    pub qname: Name,
    /// The [`RecordType`] to query for.
    pub qtype: RecordType,
    /// The query [`Class`].
    pub qclass: Class,
}

/// Represents a DNS record, i.e. an entry in the answer, authority or additional section of a DNS
/// message.
///
/// See [RFC 1035](https://www.rfc-editor.org/rfc/rfc1035) for further information.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub enum Record {
    OPT(OptRecord),
    NONOPT(NonOptRecord),
}

/// EDNS parameters used to build an [`OptRecord`].
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct EdnsConfig {
    /// The EDNS version. Only version 0 is defined.
    pub version: u8,
    /// The payload size that gets sent in the `OPT` record.
    pub payload_size: u16,
    /// The extended flags, see [`EdnsConfig::DO_FLAG`].
    pub flags: u16,
    /// Options in the order they are sent.
    pub options: Vec<EdnsOption>,
}

/// The `OPT` variant of [`Record`].
///
/// See [RFC 6891](https://www.rfc-editor.org/rfc/rfc6891#section-6) for further information.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct OptRecord {
    /// Must be [`Name::root()`].
    pub owner: Name,
    /// The number of octets of the largest UDP payload that can be reassembled and delivered in the
    /// requestor's network stack.
    pub payload_size: u16,
    /// `None` for queries. For responses, this is always the correct [`RCode`], i.e. the lower four
    /// bits from the header are included.
    pub rcode: Option<RCode>,
    /// Almost always zero.
    pub edns_version: u8,
    /// The extended flags; the most significant bit is `DO`.
    pub flags: u16,
    pub rdata: OPT,
}

/// The `NONOPT` variant of [`Record`].
///
/// See [RFC 1035](https://www.rfc-editor.org/rfc/rfc1035) for further information.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct NonOptRecord {
    /// The [`Name`] that this record is for.
    pub owner: Name,
    /// The type of this record.
    pub rtype: RecordType,
    /// The class of this record (will almost always be [`Class::IN`]).
    pub class: Class,
    /// The amount of seconds this record may be cached for.
    pub ttl: u32,
    pub rdata: Rdata,
}

/// Represents a DNS message.
///
/// See [RFC 1035](https://www.rfc-editor.org/rfc/rfc1035) for further information.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// The list of questions.
    pub questions: Vec<Question>,
    /// The list of resource records.
    pub answers: Vec<Record>,
    /// The list of name server resource records.
    pub authoritative_answers: Vec<Record>,
    /// The list of additional resource records.
    pub additional_answers: Vec<Record>,
}

impl Opcode {
    /// Encodes a `Opcode` as a byte.
    pub fn encode(&self) -> u8 {
        match self {
            Opcode::QUERY => 0,
            Opcode::IQUERY => 1,
            Opcode::STATUS => 2,
            Opcode::NOTIFY => 4,
            Opcode::UPDATE => 5,
            Opcode::DSO => 6,
        }
    }

    /// Parses an encoded `Opcode` from a byte.
    ///
    /// Returns an error if the given byte does not represent a valid DNS OpCode.
    pub fn parse(val: u8) -> Result<Opcode, ParseError> {
        Ok(match val {
            0 => Opcode::QUERY,
            1 => Opcode::IQUERY,
            2 => Opcode::STATUS,
            4 => Opcode::NOTIFY,
            5 => Opcode::UPDATE,
            6 => Opcode::DSO,
            x => return Err(ParseError::InvalidOpcode(x)),
        })
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl RCode {
    /// Encodes the lower four bits of an `RCode`, as stored in the [`Header`].
    ///
    /// The upper eight bits of extended RCODEs live in the `OPT` record.
    pub fn encode(&self) -> u8 {
        (self.to_u16() & 0b1111) as u8
    }

    /// Returns the full twelve bit value of this `RCode`.
    pub fn to_u16(&self) -> u16 {
        match self {
            RCode::NOERROR => 0,
            RCode::FORMERR => 1,
            RCode::SERVFAIL => 2,
            RCode::NXDOMAIN => 3,
            RCode::NOTIMP => 4,
            RCode::REFUSED => 5,
            RCode::YXDOMAIN => 6,
            RCode::YXRRSET => 7,
            RCode::NXRRSET => 8,
            RCode::NOTAUTH => 9,
            RCode::NOTZONE => 10,
            RCode::DSOTYPENI => 11,
            RCode::BADVERSBADSIG => 16,
            RCode::BADKEY => 17,
            RCode::BADTIME => 18,
            RCode::BADMODE => 19,
            RCode::BADNAME => 20,
            RCode::BADALG => 21,
            RCode::BADTRUNC => 22,
            RCode::BADCOOKIE => 23,
            RCode::Unknown(x) => *x,
        }
    }

    /// Decodes a twelve bit value. If EDNS is used, the upper eight bits are stored in the `OPT`
    /// record of the additional section and the lower four bits are stored in the [`Header`].
    ///
    /// Unassigned values become [`RCode::Unknown`].
    pub fn from_u16(val: u16) -> RCode {
        match val {
            0 => RCode::NOERROR,
            1 => RCode::FORMERR,
            2 => RCode::SERVFAIL,
            3 => RCode::NXDOMAIN,
            4 => RCode::NOTIMP,
            5 => RCode::REFUSED,
            6 => RCode::YXDOMAIN,
            7 => RCode::YXRRSET,
            8 => RCode::NXRRSET,
            9 => RCode::NOTAUTH,
            10 => RCode::NOTZONE,
            11 => RCode::DSOTYPENI,
            16 => RCode::BADVERSBADSIG,
            17 => RCode::BADKEY,
            18 => RCode::BADTIME,
            19 => RCode::BADMODE,
            20 => RCode::BADNAME,
            21 => RCode::BADALG,
            22 => RCode::BADTRUNC,
            23 => RCode::BADCOOKIE,
            x => RCode::Unknown(x),
        }
    }
}

impl Display for RCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RCode::Unknown(x) => write!(f, "RCODE{}", x),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordType::Unknown(x) => write!(f, "TYPE{}", x),
            _ => write!(f, "{:?}", self),
        }
    }
}

impl Class {
    /// Encodes a `Class` as a two-byte value.
    pub fn encode(&self) -> u16 {
        match self {
            Class::IN => 1,
            Class::CH => 3,
            Class::HS => 4,
            Class::NONE => 254,
            Class::ANY => 255,
        }
    }

    /// Parses an encoded `Class` from a two-byte value.
    ///
    /// Returns an error if the given value does not represent a valid DNS CLASS.
    pub fn parse(val: u16) -> Result<Class, ParseError> {
        Ok(match val {
            1 => Class::IN,
            3 => Class::CH,
            4 => Class::HS,
            254 => Class::NONE,
            255 => Class::ANY,
            x => return Err(ParseError::InvalidClass(x)),
        })
    }
}

impl Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl HeaderFlags {
    /// Creates a `HeaderFlags` struct from bitflags as they would appear in the second 16-octet
    /// line of a [`Header`].
    pub fn from_flags(flags: u16) -> Self {
        Self {
            aa: (flags & (1 << 10)) != 0,
            tc: (flags & (1 << 9)) != 0,
            rd: (flags & (1 << 8)) != 0,
            ra: (flags & (1 << 7)) != 0,
            ad: (flags & (1 << 5)) != 0,
            cd: (flags & (1 << 4)) != 0,
        }
    }

    /// Returns a u16 representing bitflags as they would appear in the second 16-octet line of a
    /// [`Header`].
    pub fn as_flags(&self) -> u16 {
        let bit = |set: bool, shift: u16| if set { 1 << shift } else { 0 };
        bit(self.aa, 10)
            | bit(self.tc, 9)
            | bit(self.rd, 8)
            | bit(self.ra, 7)
            | bit(self.ad, 5)
            | bit(self.cd, 4)
    }
}

impl Header {
    /// The length of an encoded header in bytes.
    pub const LENGTH: usize = 12;

    /// Creates a header for a DNS response message.
    ///
    /// `qdcount`, `ancount`, `nscount` and `arcount` are grouped in that order in the `counts` parameter.
    pub fn new_response_header(
        msg_id: u16,
        opcode: Opcode,
        flags: HeaderFlags,
        rcode: RCode,
        counts: [u16; 4],
    ) -> Self {
        Header {
            msg_id,
            qr: true,
            opcode,
            flags,
            rcode: Some(rcode),
            qdcount: counts[0],
            ancount: counts[1],
            nscount: counts[2],
            arcount: counts[3],
        }
    }

    /// Creates a header for a DNS query message.
    ///
    /// If the query includes an [`OPT`](rdata::opt::OPT) record, `edns` must be `true`.
    pub fn new_query_header(
        msg_id: u16,
        opcode: Opcode,
        flags: HeaderFlags,
        edns: bool,
        qdcount: u16,
    ) -> Result<Self, EncodeError> {
        if flags.aa || flags.ra {
            Err(EncodeError::AaOrRaInQuery)
        } else {
            Ok(Header {
                msg_id,
                qr: false,
                opcode,
                flags,
                rcode: None,
                qdcount,
                ancount: 0,
                nscount: 0,
                arcount: u16::from(edns),
            })
        }
    }

    /// Encodes a `Header` as a series of bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::with_capacity(Self::LENGTH);
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// The same as [`encode()`](Self::encode()), but encoded bytes are appended to the given writer
    /// instead of to a newly allocated one.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        self.encode_with_counts(
            buf,
            [self.qdcount, self.ancount, self.nscount, self.arcount],
        )
    }

    fn encode_with_counts(&self, buf: &mut impl Write, counts: [u16; 4]) -> Result<(), EncodeError> {
        let qr = u16::from(self.qr);
        let opcode = self.opcode.encode() as u16;
        let rcode = self.rcode.map(|val| val.encode() as u16).unwrap_or(0);

        let line_two = (qr << 15) | (opcode << 11) | self.flags.as_flags() | rcode;
        buf.write_u16::<NetworkEndian>(self.msg_id)?;
        buf.write_u16::<NetworkEndian>(line_two)?;
        for count in counts {
            buf.write_u16::<NetworkEndian>(count)?;
        }

        Ok(())
    }

    /// Parses an encoded `Header` from a series of bytes.
    ///
    /// Returns an error if [`Opcode::parse()`] or a method defined in
    /// [`byteorder::ReadBytesExt`] return an error.
    pub fn parse(header: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let msg_id = header.read_u16::<NetworkEndian>()?;
        let line_two = header.read_u16::<NetworkEndian>()?;
        let qr = (line_two & (1 << 15)) != 0;
        let opcode = Opcode::parse(((line_two & (0b1111 << 11)) >> 11) as u8)?;
        let flags = HeaderFlags::from_flags(line_two & 0b0000_0111_1011_0000);
        let rcode = RCode::from_u16(line_two & 0b1111);

        Ok(Header {
            msg_id,
            qr,
            opcode,
            flags,
            rcode: qr.then_some(rcode),
            qdcount: header.read_u16::<NetworkEndian>()?,
            ancount: header.read_u16::<NetworkEndian>()?,
            nscount: header.read_u16::<NetworkEndian>()?,
            arcount: header.read_u16::<NetworkEndian>()?,
        })
    }

    /// Creates a string containing information (id, opcode, rcode if applicable, flags) about the
    /// header.
    pub fn info_str(&self) -> String {
        let mut s = match self.rcode {
            Some(rcode) => format!(
                "id: {}, opcode: {}, rcode: {}, flags:",
                self.msg_id, self.opcode, rcode
            ),
            None => format!("id: {}, opcode: {}, flags:", self.msg_id, self.opcode),
        };
        let flags = [
            (self.flags.aa, "aa"),
            (self.flags.tc, "tc"),
            (self.flags.rd, "rd"),
            (self.flags.ra, "ra"),
            (self.flags.ad, "ad"),
            (self.flags.cd, "cd"),
        ];
        for (_, flag) in flags.iter().filter(|(set, _)| *set) {
            s.push(' ');
            s.push_str(flag);
        }
        s
    }
}

impl Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.qr { "Response" } else { "Query" };
        write!(f, "DNS {} ({})", kind, self.info_str())
    }
}

impl Question {
    /// Creates a DNS question.
    pub fn new(name: Name, qtype: RecordType, qclass: Class) -> Self {
        Question {
            qname: name,
            qtype,
            qclass,
        }
    }

    /// Encodes a `Question` as a series of bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// The same as [`encode()`](Self::encode()), but encoded bytes are appended to the given writer
    /// instead of to a newly allocated one.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        self.qname.encode_into(buf)?;
        buf.write_u16::<NetworkEndian>(self.qtype.into())?;
        buf.write_u16::<NetworkEndian>(self.qclass.encode())?;
        Ok(())
    }

    /// Parses an encoded `Question` from a series of bytes.
    pub fn parse(msg: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let qname = Name::parse(msg, name::Compression::Allowed)?;
        let qtype: RecordType = msg.read_u16::<NetworkEndian>()?.into();
        let qclass = Class::parse(msg.read_u16::<NetworkEndian>()?)?;

        Ok(Question {
            qname,
            qtype,
            qclass,
        })
    }

    /// Returns a string representing the question, with the owner padded to the given length.
    ///
    /// If `output` is [`Some`] and the specified output stream supports colours, the output will be
    /// colourized.
    pub fn as_padded_string(&self, owner_len: usize, output: Option<owo_colors::Stream>) -> String {
        let mut owner = format!("{:<owner_len$}", self.qname.to_string());
        let mut qtype = self.qtype.to_string();
        if let Some(stream) = output {
            owner = owner.if_supports_color(stream, |s| s.green()).to_string();
            qtype = qtype.if_supports_color(stream, |s| s.purple()).to_string();
        }

        format!("{}          {}", owner, qtype)
    }
}

impl Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DNS Question for '{}' (type: {}, class: {})",
            self.qname, self.qtype, self.qclass
        )
    }
}

impl Record {
    /// Encodes a `Record` as a series of bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// The same as [`encode()`](Self::encode()), but encoded bytes are appended to the given writer
    /// instead of to a newly allocated one.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        match self {
            Record::NONOPT(nonopt) => nonopt.encode_into(buf),
            Record::OPT(opt) => opt.encode_into(buf),
        }
    }

    /// Parses an encoded `Record` from a series of bytes.
    ///
    /// `rcode` is the RCODE from the header; an `OPT` record combines it with its extended bits.
    pub fn parse(msg: &mut Cursor<&[u8]>, rcode: Option<RCode>) -> Result<Self, ParseError> {
        let owner = Name::parse(msg, name::Compression::Allowed)?;
        let rtype: RecordType = msg.read_u16::<NetworkEndian>()?.into();
        if rtype == RecordType::OPT {
            return OptRecord::parse(msg, owner, rcode).map(Record::OPT);
        }
        let class = Class::parse(msg.read_u16::<NetworkEndian>()?)?;
        let ttl = msg.read_u32::<NetworkEndian>()?;
        let rdlength = msg.read_u16::<NetworkEndian>()?;
        let rdata = Rdata::parse(rtype, msg, rdlength)?;

        Ok(Record::NONOPT(NonOptRecord {
            owner,
            rtype,
            class,
            ttl,
            rdata,
        }))
    }

    /// Returns a reference to the inner [`OptRecord`]. [`None`] for the `NONOPT` variant.
    pub fn as_opt(&self) -> Option<&OptRecord> {
        match self {
            Self::OPT(opt) => Some(opt),
            Self::NONOPT(_) => None,
        }
    }

    /// Returns a reference to the inner [`NonOptRecord`]. [`None`] for the `OPT` variant.
    pub fn as_nonopt(&self) -> Option<&NonOptRecord> {
        match self {
            Self::NONOPT(nonopt) => Some(nonopt),
            Self::OPT(_) => None,
        }
    }

    /// Returns the inner [`NonOptRecord`]. [`None`] for the `OPT` variant.
    pub fn into_nonopt(self) -> Option<NonOptRecord> {
        match self {
            Self::NONOPT(nonopt) => Some(nonopt),
            Self::OPT(_) => None,
        }
    }
}

impl NonOptRecord {
    /// Creates a new `NonOptRecord`, taking the record type from `rdata`.
    ///
    /// Use a struct literal for [`Rdata::Unknown`], which does not know its type.
    pub fn new(owner: Name, class: Class, ttl: u32, rdata: Rdata) -> Self {
        Self {
            owner,
            rtype: rdata.rtype(),
            class,
            ttl,
            rdata,
        }
    }

    /// Encodes a `NonOptRecord` as a series of bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// The same as [`encode()`](Self::encode()), but encoded bytes are appended to the given writer
    /// instead of to a newly allocated one.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        self.owner.encode_into(buf)?;
        buf.write_u16::<NetworkEndian>(self.rtype.into())?;
        buf.write_u16::<NetworkEndian>(self.class.encode())?;
        buf.write_u32::<NetworkEndian>(self.ttl)?;
        write_rdata(buf, |rdata| self.rdata.encode_into(rdata).map(|_| ()))
    }

    /// Returns a string representing the record in the format used in zone files, but without the
    /// redundant IN class and without trailing dots for domain names.
    ///
    /// If `separate_with_single_space` is true, the different fields of the record are always
    /// separated by a single space. If it is false, all fields are separated by two spaces, and the
    /// TTL field is always six characters long (not including separators).
    ///
    /// If `owner_len`/`rtype_len` is [`Some`], the `owner`/`rtype` field is padded to the specified
    /// length.
    ///
    /// If `output` is [`Some`] and the specified output stream supports colours, the output will
    /// be colourized.
    pub fn as_string(
        &self,
        separate_with_single_space: bool,
        owner_len: Option<usize>,
        rtype_len: Option<usize>,
        output: Option<owo_colors::Stream>,
    ) -> String {
        let mut owner = format!("{:<1$}", self.owner.to_string(), owner_len.unwrap_or(0));
        let mut rtype = format!("{:<1$}", self.rtype.to_string(), rtype_len.unwrap_or(0));

        if let Some(stream) = output {
            owner = owner.if_supports_color(stream, |s| s.green()).to_string();
            rtype = rtype.if_supports_color(stream, |s| s.purple()).to_string();
        }

        if separate_with_single_space {
            format!("{} {} {} {}", owner, self.ttl, rtype, self.rdata)
        } else {
            format!("{}  {:>6}  {}  {}", owner, self.ttl, rtype, self.rdata)
        }
    }
}

impl Display for NonOptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string(true, None, None, None))
    }
}

impl EdnsConfig {
    /// The "DNSSEC OK" bit of the extended flags.
    pub const DO_FLAG: u16 = 1 << 15;

    /// The payload size advertised when none is configured.
    pub const DEFAULT_PAYLOAD_SIZE: u16 = 1280;

    /// Returns true iff the `DO` bit is set.
    pub fn do_flag(&self) -> bool {
        self.flags & Self::DO_FLAG != 0
    }
}

impl Default for EdnsConfig {
    fn default() -> Self {
        Self {
            version: 0,
            payload_size: Self::DEFAULT_PAYLOAD_SIZE,
            flags: 0,
            options: Vec::new(),
        }
    }
}

impl OptRecord {
    /// Creates a new `OPT` record.
    ///
    /// For the `rcode` parameter, see [`Self::rcode`].
    pub fn new(rcode: Option<RCode>, edns_config: &EdnsConfig) -> Self {
        Self {
            owner: Name::root(),
            payload_size: edns_config.payload_size,
            rcode,
            edns_version: edns_config.version,
            flags: edns_config.flags,
            rdata: OPT {
                options: edns_config.options.clone(),
            },
        }
    }

    /// Returns true iff the `DO` bit is set.
    pub fn do_flag(&self) -> bool {
        self.flags & EdnsConfig::DO_FLAG != 0
    }

    /// Encodes a `OptRecord` as a series of bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// The same as [`encode()`](Self::encode()), but encoded bytes are appended to the given writer
    /// instead of to a newly allocated one.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        self.owner.encode_into(buf)?;
        buf.write_u16::<NetworkEndian>(RecordType::OPT.into())?;
        buf.write_u16::<NetworkEndian>(self.payload_size)?;
        let rcode = self.rcode.map(|rcode| rcode.to_u16()).unwrap_or(0);
        buf.write_u8((rcode >> 4) as u8)?;
        buf.write_u8(self.edns_version)?;
        buf.write_u16::<NetworkEndian>(self.flags)?;
        write_rdata(buf, |rdata| self.rdata.encode_rdata_into(rdata).map(|_| ()))
    }

    /// Returns a string describing the `OPT` record, with the given `prefix` prepended to each
    /// line.
    ///
    /// If `output` is [`Some`] and the specified output stream supports colours, the option codes
    /// will be colourized.
    pub fn as_padded_string(&self, prefix: &str, output: Option<owo_colors::Stream>) -> String {
        let mut s = format!("{}{}", prefix, self);
        for option in &self.rdata.options {
            let mut line = option.to_string();
            if let Some(stream) = output {
                line = line.if_supports_color(stream, |s| s.cyan()).to_string();
            }
            s.push('\n');
            s.push_str(prefix);
            s.push_str(&line);
        }
        s
    }

    fn parse(
        msg: &mut Cursor<&[u8]>,
        owner: Name,
        rcode: Option<RCode>,
    ) -> Result<Self, ParseError> {
        if !owner.is_root() {
            return Err(ParseError::InvalidOptName(owner));
        }

        let payload_size = msg.read_u16::<NetworkEndian>()?;
        let ext_rcode = msg.read_u8()? as u16;
        let rcode = rcode.map(|rcode| match ext_rcode {
            0 => rcode,
            x => RCode::from_u16((x << 4) | rcode.encode() as u16),
        });
        let edns_version = msg.read_u8()?;
        let flags = msg.read_u16::<NetworkEndian>()?;
        let rdlength = msg.read_u16::<NetworkEndian>()?;
        let rdata = match Rdata::parse(RecordType::OPT, msg, rdlength)? {
            Rdata::OPT(opt) => opt,
            _ => OPT::default(),
        };

        Ok(OptRecord {
            owner,
            payload_size,
            rcode,
            edns_version,
            flags,
            rdata,
        })
    }
}

impl Display for OptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EDNS: Version {}, flags: ", self.edns_version)?;
        if self.do_flag() {
            write!(f, "do, ")?;
        } else {
            write!(f, "<none>, ")?;
        }
        write!(f, "payload size: {}", self.payload_size)
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::NONOPT(nonopt) => write!(f, "{}", nonopt),
            Record::OPT(opt) => write!(f, "{}", opt),
        }
    }
}

/// Writes RDLENGTH followed by the RDATA produced by `encode`.
fn write_rdata(
    buf: &mut impl Write,
    encode: impl FnOnce(&mut Vec<u8>) -> Result<(), EncodeError>,
) -> Result<(), EncodeError> {
    let mut rdata = Vec::new();
    encode(&mut rdata)?;
    let rdlength =
        u16::try_from(rdata.len()).map_err(|_| EncodeError::RdataTooLong(rdata.len()))?;
    buf.write_u16::<NetworkEndian>(rdlength)?;
    buf.write_all(&rdata)?;
    Ok(())
}

impl Message {
    /// The largest encoded message that fits the two-byte length prefix of stream transports.
    pub const MAX_LENGTH: usize = 65535;

    /// Creates a DNS query.
    ///
    /// If `edns` is [`Some`], the query will contain an `OPT` record.
    ///
    /// Returns an error if `aa` or `ra` are set in `flags`.
    pub fn new_query(
        domain: Name,
        qtype: RecordType,
        opcode: Opcode,
        flags: HeaderFlags,
        edns: Option<&EdnsConfig>,
    ) -> Result<Self, EncodeError> {
        let msg_id = rand::thread_rng().gen::<u16>();
        let header = Header::new_query_header(msg_id, opcode, flags, edns.is_some(), 1)?;

        let mut additional_answers = Vec::new();
        if let Some(edns_config) = edns {
            additional_answers.push(Record::OPT(OptRecord::new(None, edns_config)));
        }

        Ok(Message {
            header,
            questions: vec![Question::new(domain, qtype, Class::IN)],
            answers: Vec::new(),
            authoritative_answers: Vec::new(),
            additional_answers,
        })
    }

    /// Creates a DNS response.
    ///
    /// `answers`, `authoritative_answers`, `additional_answers` are grouped in that order in the `records` parameter.
    pub fn new_response(
        msg_id: u16,
        opcode: Opcode,
        flags: HeaderFlags,
        rcode: RCode,
        questions: Vec<Question>,
        records: [Vec<Record>; 3],
    ) -> Self {
        let [answers, authoritative_answers, additional_answers] = records;
        Message {
            header: Header::new_response_header(
                msg_id,
                opcode,
                flags,
                rcode,
                [
                    questions.len() as u16,
                    answers.len() as u16,
                    authoritative_answers.len() as u16,
                    additional_answers.len() as u16,
                ],
            ),
            questions,
            answers,
            authoritative_answers,
            additional_answers,
        }
    }

    /// Encodes a `Message` as a series of bytes.
    ///
    /// The header counts are taken from the actual section lengths. Returns
    /// [`EncodeError::MessageTooLong`] if the result exceeds [`Message::MAX_LENGTH`].
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        let counts = [
            self.questions.len(),
            self.answers.len(),
            self.authoritative_answers.len(),
            self.additional_answers.len(),
        ]
        .map(|count| count.min(u16::MAX as usize) as u16);
        self.header.encode_with_counts(&mut buf, counts)?;
        for question in &self.questions {
            question.encode_into(&mut buf)?;
        }
        for record in self.records() {
            record.encode_into(&mut buf)?;
        }

        if buf.len() > Self::MAX_LENGTH {
            return Err(EncodeError::MessageTooLong(buf.len()));
        }
        Ok(buf)
    }

    /// The same as [`encode()`](Self::encode()), but encoded bytes are appended to the given writer
    /// instead of to a newly allocated one.
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<(), EncodeError> {
        buf.write_all(&self.encode()?)?;
        Ok(())
    }

    /// Parses an encoded `Message` from a series of bytes.
    ///
    /// A truncated message (`TC` set) may end in the middle of a section. Parsing then stops at
    /// the first incomplete entry, keeps what came before it and lowers the header counts to
    /// match.
    pub fn parse(msg: &mut Cursor<&[u8]>) -> Result<Self, ParseError> {
        let mut header = Header::parse(msg)?;
        let rcode = header.rcode;
        let mut section = Section::new(header.flags.tc);

        let questions = section.parse(msg, header.qdcount, Question::parse)?;
        let answers = section.parse(msg, header.ancount, |msg| Record::parse(msg, rcode))?;
        let authoritative_answers =
            section.parse(msg, header.nscount, |msg| Record::parse(msg, rcode))?;
        let additional_answers =
            section.parse(msg, header.arcount, |msg| Record::parse(msg, rcode))?;

        if section.cut_off {
            header.qdcount = questions.len() as u16;
            header.ancount = answers.len() as u16;
            header.nscount = authoritative_answers.len() as u16;
            header.arcount = additional_answers.len() as u16;
        }

        for answer in &additional_answers {
            if let Record::OPT(OptRecord { rcode, .. }) = answer {
                header.rcode = *rcode;
            }
        }

        Ok(Message {
            header,
            questions,
            answers,
            authoritative_answers,
            additional_answers,
        })
    }

    /// Returns the transaction id.
    pub fn id(&self) -> u16 {
        self.header.msg_id
    }

    /// Returns the first question, if there is one.
    pub fn question(&self) -> Option<&Question> {
        self.questions.first()
    }

    /// Returns the `OPT` record from the additional section, if there is one.
    pub fn opt(&self) -> Option<&OptRecord> {
        self.additional_answers.iter().find_map(Record::as_opt)
    }

    /// Returns the owner (i.e. key name) and RDATA of the `TSIG` record, if the message is signed.
    ///
    /// Only the last record of the additional section is considered.
    pub fn tsig(&self) -> Option<(&Name, &TSIG)> {
        let record = self.additional_answers.last()?.as_nonopt()?;
        record.rdata.as_tsig().map(|tsig| (&record.owner, tsig))
    }

    /// Appends a record to the answer section and updates the header count.
    pub fn push_answer(&mut self, record: Record) {
        self.answers.push(record);
        self.header.ancount = self.header.ancount.saturating_add(1);
    }

    /// Appends a record to the additional section and updates the header count.
    pub fn push_additional(&mut self, record: Record) {
        self.additional_answers.push(record);
        self.header.arcount = self.header.arcount.saturating_add(1);
    }

    /// Removes the trailing `TSIG` record, if any, and updates the header count.
    pub fn pop_tsig(&mut self) -> Option<NonOptRecord> {
        self.tsig()?;
        let record = self.additional_answers.pop()?.into_nonopt()?;
        self.header.arcount = self.header.arcount.saturating_sub(1);
        Some(record)
    }

    /// Returns the byte offset of the `TSIG` record in the encoded message `raw`, if its last
    /// additional record is one.
    pub fn tsig_offset(raw: &[u8]) -> Result<Option<usize>, ParseError> {
        let mut cursor = Cursor::new(raw);
        let header = Header::parse(&mut cursor)?;
        Message::parse_questions(&mut cursor, header.qdcount)?;

        let total = header.ancount as usize + header.nscount as usize + header.arcount as usize;
        let mut offset = None;
        for idx in 0..total {
            let start = cursor.position() as usize;
            let record = Record::parse(&mut cursor, header.rcode)?;
            let is_tsig = matches!(
                &record,
                Record::NONOPT(NonOptRecord { rtype: RecordType::TSIG, .. })
            );
            if idx + 1 == total && header.arcount > 0 && is_tsig {
                offset = Some(start);
            }
        }
        Ok(offset)
    }

    /// Returns a string verbosely describing the message (i.e. header and all the other sections).
    ///
    /// If `output` is [`Some`] and the specified output stream supports colours, the output will
    /// be colourized.
    pub fn as_string(&self, output: Option<owo_colors::Stream>) -> String {
        let section_name = |s: &str| match output {
            Some(stream) => s.if_supports_color(stream, |s| s.yellow()).to_string(),
            None => s.to_string(),
        };

        let mut max_owner_len = 0;
        let mut max_type_len = 0;
        for q in &self.questions {
            max_owner_len = max(max_owner_len, q.qname.string_len());
            max_type_len = max(max_type_len, q.qtype.to_string().len());
        }
        for record in self.records().filter_map(Record::as_nonopt) {
            max_owner_len = max(max_owner_len, record.owner.string_len());
            max_type_len = max(max_type_len, record.rtype.to_string().len());
        }

        let mut res = String::new();
        res.push_str(&section_name("Header:\n\t"));
        res.push_str(&format!("{}\n\n", self.header.info_str()));

        if let Some(opt) = self.opt() {
            res.push_str(&section_name("OPT Pseudosection:\n"));
            res.push_str(&opt.as_padded_string("\t", output));
            res.push_str("\n\n");
        }

        res.push_str(&section_name("Question Section:\n"));
        for question in &self.questions {
            res.push('\t');
            res.push_str(&question.as_padded_string(max_owner_len, output));
            res.push('\n');
        }
        res.push('\n');

        let sections = [
            ("Answer Section:\n", &self.answers),
            ("Authoritative Section:\n", &self.authoritative_answers),
            ("Additional Section:\n", &self.additional_answers),
        ];
        for (name, records) in sections {
            let records: Vec<_> = records.iter().filter_map(Record::as_nonopt).collect();
            if records.is_empty() {
                continue;
            }
            res.push_str(&section_name(name));
            for record in records {
                res.push('\t');
                res.push_str(&record.as_string(
                    false,
                    Some(max_owner_len),
                    Some(max_type_len),
                    output,
                ));
                res.push('\n');
            }
            res.push('\n');
        }

        res.truncate(res.trim_end_matches('\n').len());
        res
    }

    /// Iterates over the answer, authority and additional sections, in that order.
    fn records(&self) -> impl Iterator<Item = &Record> {
        self.answers
            .iter()
            .chain(&self.authoritative_answers)
            .chain(&self.additional_answers)
    }

    /// Parses the question section of a DNS message.
    fn parse_questions(msg: &mut Cursor<&[u8]>, qdcount: u16) -> Result<Vec<Question>, ParseError> {
        (0..qdcount).map(|_| Question::parse(msg)).collect()
    }
}

/// Walks the sections of a message, tolerating a cut-off tail if the message is truncated.
struct Section {
    truncated: bool,
    cut_off: bool,
}

impl Section {
    fn new(truncated: bool) -> Self {
        Self {
            truncated,
            cut_off: false,
        }
    }

    fn parse<T>(
        &mut self,
        msg: &mut Cursor<&[u8]>,
        count: u16,
        mut parse_entry: impl FnMut(&mut Cursor<&[u8]>) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        let mut entries = Vec::new();
        if self.cut_off {
            return Ok(entries);
        }
        for _ in 0..count {
            match parse_entry(msg) {
                Ok(entry) => entries.push(entry),
                Err(_) if self.truncated => {
                    self.cut_off = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }
}
