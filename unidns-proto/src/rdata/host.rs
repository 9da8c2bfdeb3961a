//! RDATA definitions for records that point at another host name: `NS`, `CNAME`, `PTR` and `MX`.

use std::fmt::Display;
use std::io::{Cursor, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{EncodeError, ParseError};
use crate::name::{Compression, Name};

use super::{Rdata, RdataTrait};

#[cfg(feature = "serde")]
use serde::Serialize;

macro_rules! single_name_rdata {
    ($(#[$doc:meta])* $rtype:ident) => {
        $(#[$doc])*
        #[cfg_attr(feature = "serde", derive(Serialize))]
        #[derive(PartialEq, Eq, Clone, Debug)]
        pub struct $rtype {
            /// The host name this record points at.
            pub name: Name,
        }

        impl RdataTrait for $rtype {
            fn parse_rdata(rdata: &mut Cursor<&[u8]>, _rdlength: u16) -> Result<Rdata, ParseError> {
                Ok(Rdata::$rtype(Self {
                    name: Name::parse(rdata, Compression::Allowed)?,
                }))
            }

            fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
                self.name.encode_into(buf)
            }
        }

        impl Display for $rtype {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.name)
            }
        }
    };
}

single_name_rdata!(
    /// An authoritative name server. [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
    NS
);
single_name_rdata!(
    /// The canonical name for an alias. [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
    CNAME
);
single_name_rdata!(
    /// A pointer to another part of the domain name space, mostly used for reverse lookups.
    /// [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
    PTR
);

/// Mail exchange information. [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct MX {
    /// Lower values are preferred.
    pub preference: u16,
    /// A host willing to act as a mail exchange for the owner name.
    pub exchange: Name,
}

impl RdataTrait for MX {
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, _rdlength: u16) -> Result<Rdata, ParseError> {
        let preference = rdata.read_u16::<NetworkEndian>()?;
        let exchange = Name::parse(rdata, Compression::Allowed)?;
        Ok(Rdata::MX(Self {
            preference,
            exchange,
        }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        buf.write_u16::<NetworkEndian>(self.preference)?;
        Ok(2 + self.exchange.encode_into(buf)?)
    }
}

impl Display for MX {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.preference, self.exchange)
    }
}
