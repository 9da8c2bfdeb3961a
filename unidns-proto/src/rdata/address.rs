//! `A` and `AAAA` RDATA definitions.

use std::fmt::Display;
use std::io::{Cursor, Read, Write};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::{EncodeError, ParseError};

use super::{Rdata, RdataTrait};

#[cfg(feature = "serde")]
use serde::Serialize;

/// A record containing an IPv4 host address. [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct A {
    /// The host's address.
    pub address: Ipv4Addr,
}

/// A record containing an IPv6 host address. [\[RFC 3596\]](https://www.rfc-editor.org/rfc/rfc3596)
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct AAAA {
    /// The host's address.
    pub address: Ipv6Addr,
}

impl RdataTrait for A {
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, _rdlength: u16) -> Result<Rdata, ParseError> {
        let mut octets = [0; 4];
        rdata.read_exact(&mut octets)?;
        Ok(Rdata::A(Self {
            address: octets.into(),
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        buf.write_all(&self.address.octets())?;
        Ok(4)
    }
}

impl RdataTrait for AAAA {
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, _rdlength: u16) -> Result<Rdata, ParseError> {
        let mut octets = [0; 16];
        rdata.read_exact(&mut octets)?;
        Ok(Rdata::AAAA(Self {
            address: octets.into(),
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        buf.write_all(&self.address.octets())?;
        Ok(16)
    }
}

impl Display for A {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

impl Display for AAAA {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}
