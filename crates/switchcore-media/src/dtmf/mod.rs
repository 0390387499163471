//! Two-source DTMF ingestion (RFC 4733 in-band events and SIP INFO bodies)
//! fanning into a per-call bounded channel, consumed by a timeout-driven
//! digit buffer.

pub mod digit_buffer;
pub mod manager;
pub mod rfc4733;
pub mod sip_info;

pub use digit_buffer::{CollectOutcome, DigitBuffer, DigitBufferConfig};
pub use manager::{CallDtmfManager, DtmfChannel};
pub use rfc4733::Rfc4733Collector;
pub use sip_info::{parse_dtmf_info, DtmfInfo};
