use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by G.711 codec tables and WAV container I/O.
#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a RIFF/WAVE file")]
    NotRiff,

    #[error("wav file has no fmt chunk")]
    MissingFmtChunk,

    #[error("wav fmt chunk too small: {0} bytes")]
    FmtChunkTooSmall(usize),

    #[error("wav file has no data chunk")]
    MissingDataChunk,

    #[error("unsupported wav audio format {0}, expected 6 (a-law) or 7 (u-law)")]
    UnsupportedAudioFormat(u16),

    #[error("unsupported channel count {0}, expected 1 (mono)")]
    UnsupportedChannels(u16),

    #[error("unsupported sample rate {0}, expected 8000")]
    UnsupportedSampleRate(u32),

    #[error("unsupported bits per sample {0}, expected 8")]
    UnsupportedBitsPerSample(u16),

    #[error("wav writer already closed")]
    AlreadyClosed,
}
