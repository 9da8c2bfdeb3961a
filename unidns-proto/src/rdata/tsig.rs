//! `TSIG` RDATA definition.

use std::fmt::Display;
use std::io::{Cursor, Read, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use data_encoding::BASE64;

use crate::error::{EncodeError, ParseError};
use crate::name::{Compression, Name};

use super::{Rdata, RdataTrait};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Transaction signature. [\[RFC 8945\]](https://www.rfc-editor.org/rfc/rfc8945)
///
/// Always the last record in the additional section of a signed message.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct TSIG {
    /// The MAC algorithm, e.g. `hmac-sha256`. Never compressed on the wire.
    pub algorithm: Name,
    /// Seconds since the UNIX epoch. Only the lower 48 bits are transmitted.
    pub time_signed: u64,
    /// Permitted clock skew in seconds.
    pub fudge: u16,
    pub mac: Vec<u8>,
    /// The message id at the time of signing.
    pub original_id: u16,
    /// An extended RCODE covering TSIG processing.
    pub error: u16,
    pub other: Vec<u8>,
}

impl RdataTrait for TSIG {
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, _rdlength: u16) -> Result<Rdata, ParseError> {
        let algorithm = Name::parse(rdata, Compression::Prohibited)?;
        let time_signed = rdata.read_u48::<NetworkEndian>()?;
        let fudge = rdata.read_u16::<NetworkEndian>()?;
        let mac_len = rdata.read_u16::<NetworkEndian>()?;
        let mut mac = vec![0; mac_len as usize];
        rdata.read_exact(&mut mac)?;
        let original_id = rdata.read_u16::<NetworkEndian>()?;
        let error = rdata.read_u16::<NetworkEndian>()?;
        let other_len = rdata.read_u16::<NetworkEndian>()?;
        let mut other = vec![0; other_len as usize];
        rdata.read_exact(&mut other)?;

        Ok(Rdata::TSIG(Self {
            algorithm,
            time_signed,
            fudge,
            mac,
            original_id,
            error,
            other,
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        let algorithm_len = self.algorithm.encode_into(buf)?;
        buf.write_u48::<NetworkEndian>(self.time_signed & 0xFFFF_FFFF_FFFF)?;
        buf.write_u16::<NetworkEndian>(self.fudge)?;
        buf.write_u16::<NetworkEndian>(self.mac.len() as u16)?;
        buf.write_all(&self.mac)?;
        buf.write_u16::<NetworkEndian>(self.original_id)?;
        buf.write_u16::<NetworkEndian>(self.error)?;
        buf.write_u16::<NetworkEndian>(self.other.len() as u16)?;
        buf.write_all(&self.other)?;
        Ok(algorithm_len + 6 + 2 + 2 + self.mac.len() as u16 + 2 + 2 + 2 + self.other.len() as u16)
    }
}

impl Display for TSIG {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.algorithm,
            self.time_signed,
            self.fudge,
            BASE64.encode(&self.mac),
            self.original_id,
            self.error,
            self.other.len()
        )
    }
}
