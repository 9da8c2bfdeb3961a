//! `SOA` RDATA definition.

use std::fmt::Display;
use std::io::{Cursor, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{EncodeError, ParseError};
use crate::name::{Compression, Name};

use super::{Rdata, RdataTrait};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Marks the start of a zone of authority. [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
///
/// A full zone transfer begins and ends with the zone's `SOA` record.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct SOA {
    /// The name server that was the original or primary source of data for this zone.
    pub mname: Name,
    /// The mailbox of the person responsible for this zone.
    pub rname: Name,
    /// The version number of the zone. Wraps around; compare using serial number arithmetic.
    pub serial: u32,
    /// Seconds before the zone should be refreshed.
    pub refresh: u32,
    /// Seconds before a failed refresh should be retried.
    pub retry: u32,
    /// Upper limit in seconds before the zone is no longer authoritative.
    pub expire: u32,
    /// The TTL for negative responses. [\[RFC 2308\]](https://www.rfc-editor.org/rfc/rfc2308)
    pub minimum: u32,
}

impl RdataTrait for SOA {
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, _rdlength: u16) -> Result<Rdata, ParseError> {
        Ok(Rdata::SOA(Self {
            mname: Name::parse(rdata, Compression::Allowed)?,
            rname: Name::parse(rdata, Compression::Allowed)?,
            serial: rdata.read_u32::<NetworkEndian>()?,
            refresh: rdata.read_u32::<NetworkEndian>()?,
            retry: rdata.read_u32::<NetworkEndian>()?,
            expire: rdata.read_u32::<NetworkEndian>()?,
            minimum: rdata.read_u32::<NetworkEndian>()?,
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        let names_len = self.mname.encode_into(buf)? + self.rname.encode_into(buf)?;
        for value in [
            self.serial,
            self.refresh,
            self.retry,
            self.expire,
            self.minimum,
        ] {
            buf.write_u32::<NetworkEndian>(value)?;
        }
        Ok(names_len + 5 * 4)
    }
}

impl Display for SOA {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.mname,
            self.rname,
            self.serial,
            self.refresh,
            self.retry,
            self.expire,
            self.minimum
        )
    }
}
