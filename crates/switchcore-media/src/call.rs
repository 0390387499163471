//! Call Media facade: the external collaborator surface signalling calls
//! into for two-leg calls (allocate a session, start its relay, attach a
//! recorder), tying `switchcore-rtp`'s `Session` to this crate's `Relay`.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use switchcore_codec::Variant;
use switchcore_rtp::{Session, SessionRegistry};

use crate::error::Result;
use crate::recorder::Recorder;
use crate::relay::Relay;

/// Owns the session registry and hands back `Relay` handles for the calls
/// signalling starts. One instance per process.
pub struct CallMedia {
    registry: Arc<SessionRegistry>,
}

impl CallMedia {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Allocate a session's two leg port pairs by (sessionId, callId).
    pub async fn allocate(&self, session_id: &str, call_id: &str) -> Result<Arc<Session>> {
        Ok(self.registry.allocate(session_id, call_id).await?)
    }

    /// Release a session and its ports. Idempotent.
    pub fn release(&self, session_id: &str) {
        self.registry.release(session_id);
    }

    /// Build and start a bidirectional relay for `session`, seeding either
    /// leg's remote address if signalling already knows it (symmetric-RTP
    /// learning still governs which remote each direction actually sends to).
    pub fn start_relay(
        &self,
        session: Arc<Session>,
        allowed_payload_types: HashSet<u8>,
        caller_remote: Option<SocketAddr>,
        callee_remote: Option<SocketAddr>,
    ) -> Arc<Relay> {
        let relay = Relay::new(session, allowed_payload_types);
        if let Some(addr) = caller_remote {
            relay.seed_caller_remote(addr);
        }
        if let Some(addr) = callee_remote {
            relay.seed_callee_remote(addr);
        }
        relay.start();
        relay
    }

    /// Open a recording at `path` and attach it to `relay`'s tap.
    pub fn set_recorder(&self, relay: &Relay, path: impl Into<std::path::PathBuf>, variant: Variant) -> Result<()> {
        let recorder = Recorder::open(path, variant)?;
        relay.set_recorder(Arc::new(recorder));
        Ok(())
    }
}
