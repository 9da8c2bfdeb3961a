//! `TXT` RDATA definition.

use std::fmt::{self, Display, Write as _};
use std::io::{Cursor, Write};

use crate::error::{EncodeError, ParseError};

use super::{encode_string_into, parse_string, Rdata, RdataTrait};

#[cfg(feature = "serde")]
use serde::Serialize;

/// Descriptive text. [\[RFC 1035\]](https://www.rfc-editor.org/rfc/rfc1035)
///
/// The RDATA is a sequence of character strings of at most 255 bytes each. Longer text has to be
/// split, which [`TXT::new()`] does.
#[cfg_attr(feature = "serde", derive(Serialize))]
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct TXT {
    pub text: Vec<String>,
}

impl TXT {
    /// The longest character string.
    pub const MAX_STRING_LEN: usize = 255;

    /// Creates a `TXT` RDATA holding `text`, split into as many character strings as needed.
    ///
    /// ```
    /// # use unidns_proto::rdata::TXT;
    /// let txt = TXT::new("a".repeat(300));
    /// assert_eq!(txt.text.len(), 2);
    /// assert_eq!(txt.concatenated().len(), 300);
    /// ```
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.len() <= Self::MAX_STRING_LEN {
            return Self { text: vec![text] };
        }

        let mut strings = Vec::new();
        let mut rest = text.as_str();
        while !rest.is_empty() {
            let mut end = rest.len().min(Self::MAX_STRING_LEN);
            while !rest.is_char_boundary(end) {
                end -= 1;
            }
            let (head, tail) = rest.split_at(end);
            strings.push(head.to_string());
            rest = tail;
        }
        Self { text: strings }
    }

    /// The character strings joined without separators, which is how most protocols built on
    /// `TXT` records read them.
    pub fn concatenated(&self) -> String {
        self.text.concat()
    }
}

impl RdataTrait for TXT {
    fn parse_rdata(rdata: &mut Cursor<&[u8]>, rdlength: u16) -> Result<Rdata, ParseError> {
        let end = rdata.position() + rdlength as u64;
        let mut text = Vec::new();
        // a string running past the RDATA is caught by the length check in `Rdata::parse`
        while rdata.position() < end {
            let (string, _) = parse_string(rdata)?;
            text.push(string);
        }
        Ok(Rdata::TXT(Self { text }))
    }

    fn encode_rdata_into(&self, buf: &mut impl Write) -> Result<u16, EncodeError> {
        self.text.iter().try_fold(0, |written, string| {
            Ok(written + encode_string_into(string, &mut *buf)?)
        })
    }
}

impl Display for TXT {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, string) in self.text.iter().enumerate() {
            if idx > 0 {
                f.write_char(' ')?;
            }
            f.write_char('"')?;
            for c in string.chars() {
                if matches!(c, '"' | '\\') {
                    f.write_char('\\')?;
                }
                f.write_char(c)?;
            }
            f.write_char('"')?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> Result<Rdata, ParseError> {
        TXT::parse_rdata(&mut Cursor::new(bytes), bytes.len() as u16)
    }

    #[test]
    fn multiple_strings() {
        let rdata = parse(b"\x05hello\x00\x05world").unwrap();
        let Rdata::TXT(txt) = rdata else {
            panic!("not a TXT RDATA");
        };
        assert_eq!(txt.text, ["hello", "", "world"]);
        assert_eq!(txt.concatenated(), "helloworld");

        let mut buf = Vec::new();
        assert_eq!(txt.encode_rdata_into(&mut buf).unwrap(), 13);
        assert_eq!(buf, b"\x05hello\x00\x05world");
    }

    #[test]
    fn long_text_is_split() {
        let txt = TXT::new("y".repeat(600));
        let lens: Vec<_> = txt.text.iter().map(String::len).collect();
        assert_eq!(lens, [255, 255, 90]);

        let unsplit = TXT {
            text: vec!["y".repeat(256)],
        };
        assert!(matches!(
            unsplit.encode_rdata_into(&mut Vec::<u8>::new()),
            Err(EncodeError::StringTooLong(256))
        ));
    }

    #[test]
    fn quotes_and_backslashes_are_escaped() {
        let txt = TXT {
            text: vec![r#"say "hi""#.to_string(), r"C:\".to_string()],
        };
        assert_eq!(txt.to_string(), r#""say \"hi\"" "C:\\""#);
    }
}
