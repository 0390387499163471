use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the relay, mixer, conference manager and DTMF pipeline.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Rtp(#[from] switchcore_rtp::Error),

    #[error(transparent)]
    Codec(#[from] switchcore_codec::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("conference {0} is full")]
    ConferenceFull(String),

    #[error("unknown conference: {0}")]
    UnknownConference(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("duplicate participant {participant} in conference {bridge}")]
    DuplicateParticipant { bridge: String, participant: String },

    #[error("invalid dtmf-info body: {0}")]
    InvalidDtmfInfo(String),

    #[error("unsupported content type for dtmf info: {0}")]
    UnsupportedContentType(String),
}
