//! `OPT` RDATA definition.

use std::fmt::Display;
use std::io::{Cursor, Read, Write};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use repr_with_fallback::repr_with_fallback;

use crate::error::{EncodeError, ParseError};

use super::{Rdata, RdataTrait};

#[cfg(feature = "serde")]
use serde::Serialize;

repr_with_fallback! {
    /// The type of option as per [the IANA assignment](
    /// https://www.iana.org/assignments/dns-parameters/dns-parameters.xhtml#dns-parameters-11).
    #[cfg_attr(feature = "serde", derive(Serialize))]
    #[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
    #[non_exhaustive]
    pub enum OptionCode {
        /// Name server identifier. [\[RFC 5001\]](https://www.rfc-editor.org/rfc/rfc5001.html)
        Nsid = 3,
        /// Client subnet hint. [\[RFC 7871\]](https://www.rfc-editor.org/rfc/rfc7871.html)
        ClientSubnet = 8,
        /// DNS cookies. [\[RFC 7873\]](https://www.rfc-editor.org/rfc/rfc7873.html)
        Cookie = 10,
        /// Idle timeout for stream connections.
        /// [\[RFC 7828\]](https://www.rfc-editor.org/rfc/rfc7828.html)
        TcpKeepalive = 11,
        /// Message padding. [\[RFC 7830\]](https://www.rfc-editor.org/rfc/rfc7830.html)
        Padding = 12,
        Unknown(u16),
    }
}

impl Display for OptionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionCode::Nsid => write!(f, "NSID"),
            OptionCode::ClientSubnet => write!(f, "ECS"),
            OptionCode::Cookie => write!(f, "COOKIE"),
            OptionCode::TcpKeepalive => write!(f, "KEEPALIVE"),
            OptionCode::Padding => write!(f, "PADDING"),
            OptionCode::Unknown(u) => write!(f, "CODE{u}"),
        }
    }
}

/// One EDNS option: a code and its opaque value.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct EdnsOption {
    pub code: OptionCode,
    pub data: Vec<u8>,
}

impl EdnsOption {
    pub fn new(code: OptionCode, data: impl Into<Vec<u8>>) -> Self {
        Self {
            code,
            data: data.into(),
        }
    }
}

impl Display for EdnsOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            OptionCode::Padding => write!(f, "{}: <{} bytes>", self.code, self.data.len()),
            _ => write!(
                f,
                "{}: {}",
                self.code,
                data_encoding::HEXLOWER.encode(&self.data)
            ),
        }
    }
}

/// The options carried by an `OPT` pseudo-record, in wire order.
/// [\[RFC 6891\]](https://www.rfc-editor.org/rfc/rfc6891)
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug, Default)]
pub struct OPT {
    pub options: Vec<EdnsOption>,
}

impl OPT {
    /// Returns the value of the first option with the given code.
    pub fn get(&self, code: OptionCode) -> Option<&[u8]> {
        self.options
            .iter()
            .find(|option| option.code == code)
            .map(|option| option.data.as_slice())
    }
}

impl RdataTrait for OPT {
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, rdlength: u16) -> Result<Rdata, ParseError> {
        let mut len = 0usize;
        let mut options = Vec::new();
        while len < rdlength as usize {
            let code = rdata.read_u16::<NetworkEndian>()?.into();
            let option_len = rdata.read_u16::<NetworkEndian>()?;
            let mut data = vec![0; option_len as usize];
            rdata.read_exact(&mut data)?;
            options.push(EdnsOption { code, data });
            len += option_len as usize + 4;
        }
        Ok(Rdata::OPT(Self { options }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        let mut bytes_written = 0;
        for option in &self.options {
            buf.write_u16::<NetworkEndian>(option.code.into())?;
            buf.write_u16::<NetworkEndian>(option.data.len() as u16)?;
            buf.write_all(&option.data)?;
            bytes_written += 4 + option.data.len() as u16;
        }
        Ok(bytes_written)
    }
}

impl Display for OPT {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let options: Vec<_> = self.options.iter().map(ToString::to_string).collect();
        write!(f, "{}", options.join(", "))
    }
}
