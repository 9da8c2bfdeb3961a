//! Errors of the wire codec.

use thiserror::Error;

use crate::Name;

/// Why a message (or a part of it) could not be decoded.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Unknown opcode {0}; only 0-2 and 4-6 are assigned.")]
    InvalidOpcode(u8),

    #[error("Unknown class {0}; expected IN, CH, HS, NONE or ANY.")]
    InvalidClass(u16),

    #[error("OPT record owned by {0} instead of the root.")]
    InvalidOptName(Name),

    #[error("Name of {0} bytes exceeds the limit of 255.")]
    NameTooLong(usize),

    #[error("Label of {0} bytes exceeds the limit of 63.")]
    LabelTooLong(usize),

    #[error("Invalid name: only letters, digits, underscores and inner hyphens are allowed in labels.")]
    NameInvalidChars,

    #[error("Invalid name: empty label.")]
    EmptyLabel,

    #[error("Unsupported label type {0}; only plain labels (0) and pointers (192) are known.")]
    InvalidLabelType(u8),

    #[error("Name follows too many compression pointers.")]
    CompressionLoop,

    #[error("Compressed name in a field that must not be compressed.")]
    CompressionProhibited,

    #[error("RDATA of {expected} bytes announced, but {actual} were consumed.")]
    RdataLengthMismatch { expected: u16, actual: u64 },

    #[error("Character string is not ASCII: {0}.")]
    NonAsciiString(String),

    #[error("Message ended early or could not be read.")]
    IoError(#[from] std::io::Error),
}

/// Why a message (or a part of it) could not be encoded.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Name of {0} bytes exceeds the limit of 255.")]
    DomainTooLong(usize),

    #[error("Label of {0} bytes exceeds the limit of 63.")]
    LabelTooLong(usize),

    #[error("Queries must not set the AA or RA flag.")]
    AaOrRaInQuery,

    #[error("Message of {0} bytes exceeds the limit of 65535.")]
    MessageTooLong(usize),

    #[error("RDATA of {0} bytes exceeds the limit of 65535.")]
    RdataTooLong(usize),

    #[error("Character string is not ASCII: {0}.")]
    NonAsciiString(String),

    #[error("Character string of {0} bytes exceeds the limit of 255.")]
    StringTooLong(usize),

    #[error("Could not write the encoded message.")]
    IoError(#[from] std::io::Error),
}
