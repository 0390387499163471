//! RTP relay, conference mixer, recorder and DTMF pipeline for the
//! switchcore PBX media plane.

pub mod call;
pub mod conference;
pub mod config;
pub mod dtmf;
pub mod error;
pub mod mixer;
pub mod recorder;
pub mod relay;

pub use call::CallMedia;
pub use conference::{ConferenceManager, ParticipantInfo, RoomOptions};
pub use config::{DtmfConfig, MediaConfig, ToneConfig};
pub use dtmf::{parse_dtmf_info, CallDtmfManager, CollectOutcome, DigitBuffer, DigitBufferConfig, DtmfChannel, DtmfInfo, Rfc4733Collector};
pub use error::{Error, Result};
pub use mixer::{Mixer, MixerParticipant};
pub use recorder::Recorder;
pub use relay::Relay;
