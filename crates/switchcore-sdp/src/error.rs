use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while parsing an SDP message (RFC 4566 subset).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("empty sdp body")]
    Empty,

    #[error("malformed line {line_no}: {line}")]
    MalformedLine { line_no: usize, line: String },

    #[error("missing required field on line {line_no}: {line}")]
    MissingField { line_no: usize, line: String },

    #[error("invalid numeric field on line {line_no}: {line}")]
    InvalidNumber { line_no: usize, line: String },
}
