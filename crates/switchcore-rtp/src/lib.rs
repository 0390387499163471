//! RTP packet framing, UDP port-pair allocation, and per-call session
//! lifecycle for the switchcore media plane.

pub mod error;
pub mod packet;
pub mod port_pool;
pub mod session;

pub use error::{Error, Result};
pub use packet::{RtpHeader, TelephoneEvent, HEADER_LEN};
pub use port_pool::{PortPair, PortPool, SocketPair};
pub use session::{ReaperConfig, Session, SessionCounters, SessionCountersSnapshot, SessionRegistry, SessionState};
