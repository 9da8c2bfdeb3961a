//! EDNS and TSIG additions made to the copy of a query that actually goes out.

use unidns_proto::error::EncodeError;
use unidns_proto::rdata::EdnsOption;
use unidns_proto::{EdnsConfig, Message, OptRecord, Record};

use crate::error::ConfigError;
use crate::tsig::TsigSigner;

/// Builds the EDNS configuration for `level`: `0` enables EDNS version 0, `-1` disables it.
///
/// A `payload_size` of 0 selects [`EdnsConfig::DEFAULT_PAYLOAD_SIZE`].
pub fn edns_config(
    level: i32,
    payload_size: u16,
    flags: u16,
    options: Vec<EdnsOption>,
) -> Result<Option<EdnsConfig>, ConfigError> {
    match level {
        -1 => Ok(None),
        0 => Ok(Some(EdnsConfig {
            version: 0,
            payload_size: match payload_size {
                0 => EdnsConfig::DEFAULT_PAYLOAD_SIZE,
                size => size,
            },
            flags,
            options,
        })),
        level => Err(ConfigError::InvalidEdnsLevel(level)),
    }
}

/// Adds an `OPT` record built from `edns`, unless the query already carries one.
pub fn apply_edns(query: &mut Message, edns: Option<&EdnsConfig>) {
    if let Some(edns) = edns {
        if query.opt().is_none() {
            query.push_additional(Record::OPT(OptRecord::new(None, edns)));
        }
    }
}

/// Signs the query with `key`, if there is one. Must run after every other change to the query.
pub fn apply_signature(
    query: &mut Message,
    key: Option<&dyn TsigSigner>,
) -> Result<(), EncodeError> {
    match key {
        Some(key) => key.sign(query),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use unidns_proto::rdata::{EdnsOption, OptionCode};
    use unidns_proto::{EdnsConfig, HeaderFlags, Message, Name, Opcode, RecordType};

    use super::*;
    use crate::tsig::{Algorithm, HmacKey};

    fn query(edns: Option<&EdnsConfig>) -> Message {
        Message::new_query(
            Name::from_ascii("example.org").unwrap(),
            RecordType::MX,
            Opcode::QUERY,
            HeaderFlags::default(),
            edns,
        )
        .unwrap()
    }

    #[test]
    fn edns_levels() {
        assert_eq!(edns_config(-1, 4096, 0, vec![]).unwrap(), None);

        let config = edns_config(0, 0, EdnsConfig::DO_FLAG, vec![]).unwrap().unwrap();
        assert_eq!(config.payload_size, 1280);
        assert!(config.do_flag());

        for level in [1, -2] {
            assert!(matches!(
                edns_config(level, 0, 0, vec![]),
                Err(ConfigError::InvalidEdnsLevel(l)) if l == level
            ));
        }
    }

    #[test]
    fn existing_opt_record_is_kept() {
        let ours = EdnsConfig {
            payload_size: 4096,
            ..Default::default()
        };
        let mut msg = query(Some(&EdnsConfig::default()));
        apply_edns(&mut msg, Some(&ours));
        assert_eq!(msg.additional_answers.len(), 1);
        assert_eq!(msg.opt().unwrap().payload_size, 1280);
    }

    #[test]
    fn edns_is_added_with_options() {
        let config = edns_config(
            0,
            1232,
            0,
            vec![EdnsOption::new(OptionCode::Nsid, vec![])],
        )
        .unwrap();
        let mut msg = query(None);
        apply_edns(&mut msg, config.as_ref());
        let opt = msg.opt().unwrap();
        assert_eq!(opt.payload_size, 1232);
        assert_eq!(opt.rdata.options.len(), 1);
        assert_eq!(msg.header.arcount, 1);

        let mut untouched = query(None);
        apply_edns(&mut untouched, None);
        assert!(untouched.opt().is_none());
    }

    #[test]
    fn signature_goes_last() {
        let key = HmacKey::new(Name::from_ascii("k").unwrap(), Algorithm::Sha256, b"s").unwrap();
        let mut msg = query(None);
        apply_edns(&mut msg, Some(&EdnsConfig::default()));
        apply_signature(&mut msg, Some(&key)).unwrap();

        assert_eq!(msg.additional_answers.len(), 2);
        assert!(msg.tsig().is_some());

        let mut unsigned = query(None);
        apply_signature(&mut unsigned, None).unwrap();
        assert!(unsigned.additional_answers.is_empty());
    }
}
