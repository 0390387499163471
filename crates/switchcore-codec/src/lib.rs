//! G.711 codec tables and WAV container I/O for the switchcore media plane.

pub mod error;
pub mod g711;
pub mod player;
pub mod wav;

pub use error::{Error, Result};
pub use g711::Variant;
pub use player::{play, CancelToken, PlaybackResult};
pub use wav::{read_wav, recording_path, WavFile, WavFormat, WavWriter};
