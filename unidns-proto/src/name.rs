//! Definition and implementation of the [`Name`] type.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt::Display;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};
use smartstring::SmartString;

use crate::error::{EncodeError, ParseError};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Upper bound on compression pointers followed while parsing a single name.
const MAX_POINTERS: usize = 64;

/// A DNS domain name.
///
/// Comparison is case-insensitive and follows the canonical ordering of
/// [RFC 4034, Section 6.1](https://www.rfc-editor.org/rfc/rfc4034#section-6.1).
///
/// The string representation omits the trailing dot, except for the root, which is `"."`.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(Eq, Clone, Debug)]
pub struct Name {
    // does not contain the root label, as that would be the empty string
    labels: VecDeque<SmartString<smartstring::LazyCompact>>,
}

/// Whether DNS message/name compression is allowed when parsing a [`Name`].
///
/// Names inside `TSIG` RDATA, for example, must not be compressed.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Compression {
    /// Message compression is allowed.
    Allowed,
    /// Message compression is prohibited.
    Prohibited,
}

impl Name {
    /// Returns a `Name` representing the DNS root (`"."`).
    ///
    /// # Examples
    /// ```rust
    /// use unidns_proto::Name;
    ///
    /// assert_eq!(Name::from_ascii(".").ok(), Some(Name::root()));
    /// ```
    pub fn root() -> Self {
        Self {
            labels: VecDeque::new(),
        }
    }

    /// Parses a `Name` in wire format from the given cursor, which must wrap the complete message
    /// so that compression pointers can be followed.
    ///
    /// After parsing, the cursor is positioned right behind the name (or behind the first
    /// compression pointer, if there was one).
    ///
    /// # Examples
    /// ```rust
    /// use std::io::Cursor;
    /// use unidns_proto::name::{Compression, Name};
    ///
    /// // "example.com" followed by "sub" and a pointer back to "example.com"
    /// let bytes = b"\x07example\x03com\0\x03sub\xc0\x00";
    /// let mut cursor = Cursor::new(bytes as &[u8]);
    /// let first = Name::parse(&mut cursor, Compression::Allowed).unwrap();
    /// assert_eq!(first, Name::from_ascii("example.com").unwrap());
    ///
    /// let second = Name::parse(&mut cursor, Compression::Allowed).unwrap();
    /// assert_eq!(second, Name::from_ascii("sub.example.com").unwrap());
    /// assert_eq!(cursor.position(), bytes.len() as u64);
    /// ```
    pub fn parse(msg: &mut Cursor<&[u8]>, compression: Compression) -> Result<Self, ParseError> {
        let mut labels = VecDeque::new();
        let mut wire_len = 0;
        let mut resume_at = None;
        let mut pointers = 0;

        loop {
            let len = msg.read_u8()?;
            match len & 0b1100_0000 {
                0 if len == 0 => break,
                0 => {
                    let mut label = vec![0; len as usize];
                    msg.read_exact(&mut label)?;
                    wire_len += 1 + label.len();
                    if wire_len > 255 {
                        return Err(ParseError::NameTooLong(wire_len));
                    }
                    labels.push_back(label.iter().map(|&b| b as char).collect());
                }
                0b1100_0000 => {
                    if compression == Compression::Prohibited {
                        return Err(ParseError::CompressionProhibited);
                    }
                    pointers += 1;
                    if pointers > MAX_POINTERS {
                        return Err(ParseError::CompressionLoop);
                    }
                    let offset = (((len & 0b0011_1111) as u64) << 8) + msg.read_u8()? as u64;
                    if resume_at.is_none() {
                        resume_at = Some(msg.position());
                    }
                    msg.seek(SeekFrom::Start(offset))?;
                }
                _ => return Err(ParseError::InvalidLabelType(len)),
            }
        }

        if let Some(pos) = resume_at {
            msg.set_position(pos);
        }

        Ok(Name { labels })
    }

    /// Constructs a `Name` from an ASCII domain string.
    ///
    /// Labels consist of `a-z`, `A-Z`, `0-9`, `_` and `-` and must not start or end with `-`. The
    /// first label may be the wildcard `*`. A trailing dot is allowed.
    ///
    /// # Examples
    /// ```rust
    /// use unidns_proto::Name;
    ///
    /// assert_eq!(Name::from_ascii("").ok(), Some(Name::root()));
    /// assert!(Name::from_ascii("example.com.").is_ok());
    /// assert!(Name::from_ascii("*.example.com").is_ok());
    /// assert!(Name::from_ascii("hmac-sha256").is_ok());
    ///
    /// assert!(Name::from_ascii("a*.example.com").is_err());
    /// assert!(Name::from_ascii("example..com").is_err());
    /// assert!(Name::from_ascii("-example.com").is_err());
    /// ```
    pub fn from_ascii(name: impl AsRef<str>) -> Result<Self, ParseError> {
        let name = name.as_ref();

        if name == "." || name.is_empty() {
            return Ok(Self::root());
        }

        if name.len() > 255 {
            return Err(ParseError::NameTooLong(name.len()));
        }

        let name = name.strip_suffix('.').unwrap_or(name);
        let mut labels = VecDeque::new();
        for (idx, label) in name.split('.').enumerate() {
            if label.is_empty() {
                return Err(ParseError::EmptyLabel);
            }
            if label.len() > 63 {
                return Err(ParseError::LabelTooLong(label.len()));
            }
            if !(idx == 0 && label == "*") {
                Name::check_label(label)?;
            }
            labels.push_back(label.into());
        }

        Ok(Name { labels })
    }

    /// Encodes this name in wire format into the given buffer, without compression.
    ///
    /// Returns the number of bytes written on success.
    ///
    /// # Examples
    /// ```rust
    /// use unidns_proto::Name;
    ///
    /// let mut buf = Vec::new();
    /// let name = Name::from_ascii("example.com").unwrap();
    /// assert_eq!(name.encode_into(&mut buf).unwrap(), 13);
    /// assert_eq!(buf, b"\x07example\x03com\0");
    /// ```
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        self.write_labels(buf, false)
    }

    /// Like [`encode_into()`](Self::encode_into()), but all labels are lowercased, as required
    /// for the canonical form used in signatures.
    pub fn encode_canonical_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        self.write_labels(buf, true)
    }

    fn write_labels(&self, buf: &mut impl Write, lowercase: bool) -> Result<u16, EncodeError> {
        let wire_len = self.wire_len();
        if wire_len > 255 {
            return Err(EncodeError::DomainTooLong(wire_len));
        }
        for label in &self.labels {
            if label.len() > 63 {
                return Err(EncodeError::LabelTooLong(label.len()));
            }
            buf.write_u8(label.len() as u8)?;
            if lowercase {
                buf.write_all(label.to_ascii_lowercase().as_bytes())?;
            } else {
                buf.write_all(label.as_bytes())?;
            }
        }
        buf.write_u8(0)?;
        Ok(wire_len as u16)
    }

    /// Returns the length of this name in uncompressed wire format, including the root label.
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|label| label.len() + 1).sum::<usize>() + 1
    }

    /// Returns the number of labels, not counting the root label.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Returns true iff this `Name` is `other` or one of its ancestors.
    ///
    /// # Examples
    /// ```rust
    /// use unidns_proto::Name;
    ///
    /// let zone = Name::from_ascii("example.com").unwrap();
    /// let host = Name::from_ascii("www.Example.com").unwrap();
    ///
    /// assert!(zone.zone_of(&host));
    /// assert!(!host.zone_of(&zone));
    /// ```
    pub fn zone_of(&self, other: &Name) -> bool {
        self.label_count() <= other.label_count()
            && self
                .labels
                .iter()
                .rev()
                .zip(other.labels.iter().rev())
                .all(|(a, b)| a.eq_ignore_ascii_case(b))
    }

    /// Returns the length of the string returned if this `Name` is made into a [`String`].
    pub fn string_len(&self) -> usize {
        if self.is_root() {
            1
        } else {
            self.wire_len() - 2
        }
    }

    /// Returns true iff this `Name` represents the DNS root (`"."`).
    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Checks if the given string is a valid, non-empty DNS name label.
    fn check_label(label: &str) -> Result<(), ParseError> {
        let bytes = label.as_bytes();
        let valid_char = |c: &u8| c.is_ascii_alphanumeric() || *c == b'_' || *c == b'-';
        if !bytes.iter().all(valid_char) {
            return Err(ParseError::NameInvalidChars);
        }
        if bytes.first() == Some(&b'-') || bytes.last() == Some(&b'-') {
            return Err(ParseError::NameInvalidChars);
        }
        Ok(())
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for Name {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Name {
    fn cmp(&self, other: &Self) -> Ordering {
        // most significant (rightmost) labels first, case-insensitive
        let mut self_lbls = self.labels.iter().rev();
        let mut other_lbls = other.labels.iter().rev();
        loop {
            match (self_lbls.next(), other_lbls.next()) {
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
                (Some(a), Some(b)) => {
                    let a = a.to_ascii_lowercase();
                    let b = b.to_ascii_lowercase();
                    match a.as_bytes().cmp(b.as_bytes()) {
                        Ordering::Equal => (),
                        unequal => return unequal,
                    }
                }
            }
        }
    }
}

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            return write!(f, ".");
        }
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", label)?;
        }
        Ok(())
    }
}
