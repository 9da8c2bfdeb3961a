//! RDATA type definitions.
//!
//! Only the record types this crate needs to look into are modelled; everything else is kept as
//! opaque bytes in [`Rdata::Unknown`] and written back unchanged.

use std::fmt::Display;
use std::io::{Cursor, Read, Write};

use byteorder::ReadBytesExt;
use data_encoding::HEXUPPER;

use crate::error::{EncodeError, ParseError};
use crate::RecordType;

#[cfg(feature = "serde")]
use serde::Serialize;

pub mod address;
pub mod host;
pub mod opt;
pub mod soa;
pub mod tsig;
pub mod txt;

pub use address::{A, AAAA};
pub use host::{CNAME, MX, NS, PTR};
pub use opt::{EdnsOption, OptionCode, OPT};
pub use soa::SOA;
pub use tsig::TSIG;
pub use txt::TXT;

/// The record data (RDATA) for a [`Record`][super::Record].
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
#[non_exhaustive]
pub enum Rdata {
    A(A),
    NS(NS),
    CNAME(CNAME),
    SOA(SOA),
    PTR(PTR),
    MX(MX),
    TXT(TXT),
    AAAA(AAAA),
    OPT(OPT),
    TSIG(TSIG),

    /// Unknown RDATA, containing the raw RDATA bytes.
    Unknown(Vec<u8>),
}

/// A trait for working with the different RDATA variants.
pub trait RdataTrait: Sized + Display {
    /// Parses the RDATA starting at `rdata`'s current position.
    ///
    /// `rdata` wraps the complete DNS message, so that compressed names inside the RDATA can be
    /// resolved. `rdlength` is the byte count of the encoded RDATA.
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, rdlength: u16) -> Result<Rdata, ParseError>;

    /// Encodes the RDATA into the given `buf` and returns the number of written bytes on success.
    ///
    /// Names are never compressed.
    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError>;
}

#[doc(hidden)]
macro_rules! impl_from_rtype {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Rdata {
                fn from(rdata: $variant) -> Self {
                    Self::$variant(rdata)
                }
            }
        )*
    };
}

#[doc(hidden)]
macro_rules! impl_as_rtype {
    ($method:ident, $method_mut:ident, $variant:ident) => {
        #[doc = concat!("Returns a reference to the inner [`", stringify!($variant), "`], if any.")]
        pub fn $method(&self) -> Option<&$variant> {
            if let Self::$variant(inner) = self {
                Some(inner)
            } else {
                None
            }
        }

        #[doc = concat!("Returns a mutable reference to the inner [`", stringify!($variant), "`], if any.")]
        pub fn $method_mut(&mut self) -> Option<&mut $variant> {
            if let Self::$variant(ref mut inner) = self {
                Some(inner)
            } else {
                None
            }
        }
    };
}

/// Match on every [`Rdata`] variant and execute a block for it.
///
/// `$arm` is used for all modelled variants with the inner value bound to `$inner`;
/// `$unknown_arm` is used for [`Rdata::Unknown`] with the raw bytes bound to `$inner_unknown`.
macro_rules! match_rdata {
    ($self:ident, $inner:ident, $arm:block, $inner_unknown:ident, $unknown_arm:block) => {
        match $self {
            Rdata::A($inner) => $arm,
            Rdata::NS($inner) => $arm,
            Rdata::CNAME($inner) => $arm,
            Rdata::SOA($inner) => $arm,
            Rdata::PTR($inner) => $arm,
            Rdata::MX($inner) => $arm,
            Rdata::TXT($inner) => $arm,
            Rdata::AAAA($inner) => $arm,
            Rdata::OPT($inner) => $arm,
            Rdata::TSIG($inner) => $arm,
            Rdata::Unknown($inner_unknown) => $unknown_arm,
        }
    };
}

impl Rdata {
    /// Parses RDATA of the given type. Types without a dedicated representation become
    /// [`Rdata::Unknown`].
    ///
    /// Returns an error if the parsed RDATA does not span exactly `rdlength` bytes.
    pub fn parse(
        rtype: RecordType,
        msg: &mut Cursor<&[u8]>,
        rdlength: u16,
    ) -> Result<Rdata, ParseError> {
        let start = msg.position();
        let rdata = match rtype {
            RecordType::A => A::parse_rdata(msg, rdlength),
            RecordType::NS => NS::parse_rdata(msg, rdlength),
            RecordType::CNAME => CNAME::parse_rdata(msg, rdlength),
            RecordType::SOA => SOA::parse_rdata(msg, rdlength),
            RecordType::PTR => PTR::parse_rdata(msg, rdlength),
            RecordType::MX => MX::parse_rdata(msg, rdlength),
            RecordType::TXT => TXT::parse_rdata(msg, rdlength),
            RecordType::AAAA => AAAA::parse_rdata(msg, rdlength),
            RecordType::OPT => OPT::parse_rdata(msg, rdlength),
            RecordType::TSIG => TSIG::parse_rdata(msg, rdlength),
            _ => {
                let mut raw = vec![0; rdlength as usize];
                msg.read_exact(&mut raw)?;
                Ok(Rdata::Unknown(raw))
            }
        }?;

        let actual = msg.position() - start;
        if actual != rdlength as u64 {
            return Err(ParseError::RdataLengthMismatch {
                expected: rdlength,
                actual,
            });
        }
        Ok(rdata)
    }

    /// Encodes the RDATA and returns the encoded bytes.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode_into(&mut buf)?;
        Ok(buf)
    }

    /// See [`RdataTrait::encode_rdata_into()`].
    pub fn encode_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        match_rdata!(self, rdata, { rdata.encode_rdata_into(buf) }, raw, {
            buf.write_all(raw)?;
            Ok(raw.len() as u16)
        })
    }

    /// Returns the [`RecordType`] that matches this RDATA.
    ///
    /// [`Rdata::Unknown`] does not know its type and returns [`RecordType::Unknown(0)`].
    pub fn rtype(&self) -> RecordType {
        match self {
            Rdata::A(_) => RecordType::A,
            Rdata::NS(_) => RecordType::NS,
            Rdata::CNAME(_) => RecordType::CNAME,
            Rdata::SOA(_) => RecordType::SOA,
            Rdata::PTR(_) => RecordType::PTR,
            Rdata::MX(_) => RecordType::MX,
            Rdata::TXT(_) => RecordType::TXT,
            Rdata::AAAA(_) => RecordType::AAAA,
            Rdata::OPT(_) => RecordType::OPT,
            Rdata::TSIG(_) => RecordType::TSIG,
            Rdata::Unknown(_) => RecordType::Unknown(0),
        }
    }

    impl_as_rtype!(as_a, as_mut_a, A);
    impl_as_rtype!(as_aaaa, as_mut_aaaa, AAAA);
    impl_as_rtype!(as_soa, as_mut_soa, SOA);
    impl_as_rtype!(as_opt, as_mut_opt, OPT);
    impl_as_rtype!(as_tsig, as_mut_tsig, TSIG);
}

impl_from_rtype!(A, NS, CNAME, SOA, PTR, MX, TXT, AAAA, OPT, TSIG);

impl Display for Rdata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match_rdata!(self, rdata, { write!(f, "{}", rdata) }, data, {
            write!(f, "\\# {} {}", data.len(), HEXUPPER.encode(data))
        })
    }
}

/// Parses a character string as defined in [RFC 1035](https://www.rfc-editor.org/rfc/rfc1035),
/// i.e. a length byte followed by that many ASCII characters.
///
/// Returns the parsed string and the number of bytes read (including the length byte).
pub fn parse_string(msg: &mut Cursor<&[u8]>) -> Result<(String, usize), ParseError> {
    let length = msg.read_u8()?;
    let mut string = vec![0; length as usize];
    msg.read_exact(&mut string)?;

    if !string.is_ascii() {
        return Err(ParseError::NonAsciiString(
            String::from_utf8_lossy(&string).into_owned(),
        ));
    }

    let bytes_read = string.len() + 1;
    Ok((String::from_utf8_lossy(&string).into_owned(), bytes_read))
}

/// Encodes `string` as an RFC 1035 character string into `buf`.
///
/// Returns the number of bytes written on success.
pub fn encode_string_into(
    string: impl AsRef<str>,
    buf: &mut impl Write,
) -> Result<u16, EncodeError> {
    let string = string.as_ref();

    if !string.is_ascii() {
        return Err(EncodeError::NonAsciiString(string.to_string()));
    }
    if string.len() > u8::MAX as usize {
        return Err(EncodeError::StringTooLong(string.len()));
    }

    buf.write_all(&[string.len() as u8])?;
    buf.write_all(string.as_bytes())?;
    Ok(1 + string.len() as u16)
}
