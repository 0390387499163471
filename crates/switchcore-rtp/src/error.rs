use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by port allocation and session lifecycle management.
#[derive(Error, Debug)]
pub enum Error {
    #[error("port pool exhausted: no free pair in [{min}, {max}]")]
    PortsExhausted { min: u16, max: u16 },

    #[error("invalid port range: min {min} must be even and less than max {max}")]
    InvalidRange { min: u16, max: u16 },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("duplicate session id: {0}")]
    DuplicateSession(String),
}
