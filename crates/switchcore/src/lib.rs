//! Umbrella facade over the switchcore media plane: RTP relay and port
//! pool, G.711/WAV codec I/O, SDP parsing, and the conference/DTMF
//! subsystems, wired up behind one `MediaCore` trait.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use switchcore_rtp::{PortPool, ReaperConfig, SessionRegistry};

pub use switchcore_codec as codec;
pub use switchcore_media as media;
pub use switchcore_rtp as rtp;
pub use switchcore_sdp as sdp;

pub use media::{
    CallDtmfManager, CallMedia, ConferenceManager, DtmfChannel, DtmfConfig, MediaConfig, ParticipantInfo, RoomOptions,
    ToneConfig,
};

pub type Error = media::Error;
pub type Result<T> = media::Result<T>;

/// The external collaborator surface signalling calls into (spec §6):
/// allocate/release two-leg sessions, start their relay, attach a recorder,
/// join/leave conferences, and acquire/release/inject DTMF — all keyed by
/// the ids signalling already tracks (`sessionId`, `bridgeId`, `callId`)
/// rather than by any handle internal to this crate.
#[async_trait]
pub trait MediaCore: Send + Sync {
    async fn allocate_session(&self, session_id: &str, call_id: &str) -> Result<()>;

    fn release_session(&self, session_id: &str);

    fn start_relay(
        &self,
        session_id: &str,
        allowed_payload_types: HashSet<u8>,
        caller_remote: Option<SocketAddr>,
        callee_remote: Option<SocketAddr>,
    ) -> Result<()>;

    fn set_recorder(&self, session_id: &str, path: PathBuf, variant: codec::Variant) -> Result<()>;

    async fn conference_join(
        &self,
        bridge_id: &str,
        bridge_name: &str,
        call_id: &str,
        payload_type: u8,
        options: RoomOptions,
    ) -> Result<u16>;

    async fn conference_leave(&self, bridge_id: &str, call_id: &str) -> Result<()>;

    fn dtmf_acquire(&self, call_id: &str) -> DtmfChannel;

    fn dtmf_release(&self, call_id: &str);

    fn dtmf_inject(&self, call_id: &str, digit: char);
}

/// Concrete `MediaCore`: one port pool, one session registry (with its idle
/// reaper), one conference manager and one DTMF manager shared across every
/// call and room this process handles.
pub struct MediaCoreHandle {
    config: MediaConfig,
    call_media: CallMedia,
    conference: ConferenceManager,
    dtmf: Arc<CallDtmfManager>,
    relays: std::sync::Mutex<HashMap<String, Arc<media::Relay>>>,
}

impl MediaCoreHandle {
    pub fn new(config: MediaConfig) -> Result<Arc<Self>> {
        let pool = Arc::new(PortPool::new(config.port_min, config.port_max)?);
        let registry = Arc::new(SessionRegistry::new(pool.clone()));
        registry.start_reaper(ReaperConfig {
            idle_timeout: config.idle_session_timeout,
            scan_interval: config.reaper_interval,
        });

        Ok(Arc::new(Self {
            call_media: CallMedia::new(registry),
            conference: ConferenceManager::new(pool),
            dtmf: Arc::new(CallDtmfManager::new()),
            relays: std::sync::Mutex::new(HashMap::new()),
            config,
        }))
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub fn call_media(&self) -> &CallMedia {
        &self.call_media
    }

    pub fn conference(&self) -> &ConferenceManager {
        &self.conference
    }

    pub fn dtmf(&self) -> &Arc<CallDtmfManager> {
        &self.dtmf
    }

    /// Stop the reaper and every relay this handle started. Callers are
    /// still responsible for leaving any conference rooms and releasing any
    /// sessions they allocated directly through `call_media()`.
    pub async fn shutdown(&self) {
        self.call_media.registry().stop_reaper().await;
        let relays: Vec<_> = self.relays.lock().unwrap().drain().map(|(_, relay)| relay).collect();
        for relay in relays {
            relay.stop().await;
        }
    }
}

#[async_trait]
impl MediaCore for MediaCoreHandle {
    async fn allocate_session(&self, session_id: &str, call_id: &str) -> Result<()> {
        self.call_media.allocate(session_id, call_id).await?;
        Ok(())
    }

    fn release_session(&self, session_id: &str) {
        self.relays.lock().unwrap().remove(session_id);
        self.call_media.release(session_id);
    }

    fn start_relay(
        &self,
        session_id: &str,
        allowed_payload_types: HashSet<u8>,
        caller_remote: Option<SocketAddr>,
        callee_remote: Option<SocketAddr>,
    ) -> Result<()> {
        let session = self
            .call_media
            .registry()
            .get(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        let relay = self
            .call_media
            .start_relay(session, allowed_payload_types, caller_remote, callee_remote);
        self.relays.lock().unwrap().insert(session_id.to_string(), relay);
        Ok(())
    }

    fn set_recorder(&self, session_id: &str, path: PathBuf, variant: codec::Variant) -> Result<()> {
        let guard = self.relays.lock().unwrap();
        let relay = guard
            .get(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        self.call_media.set_recorder(relay, path, variant)
    }

    async fn conference_join(
        &self,
        bridge_id: &str,
        bridge_name: &str,
        call_id: &str,
        payload_type: u8,
        options: RoomOptions,
    ) -> Result<u16> {
        self.conference
            .join(bridge_id, bridge_name, call_id, payload_type, options)
            .await
    }

    async fn conference_leave(&self, bridge_id: &str, call_id: &str) -> Result<()> {
        self.conference.leave(bridge_id, call_id).await
    }

    fn dtmf_acquire(&self, call_id: &str) -> DtmfChannel {
        self.dtmf.acquire(call_id)
    }

    fn dtmf_release(&self, call_id: &str) {
        self.dtmf.release(call_id);
    }

    fn dtmf_inject(&self, call_id: &str, digit: char) {
        self.dtmf.inject(call_id, digit);
    }
}

impl Drop for MediaCoreHandle {
    fn drop(&mut self) {
        if !self.relays.lock().unwrap().is_empty() {
            warn!("MediaCoreHandle dropped with relays still running; call shutdown() first");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn media_core_builds_and_shuts_down_cleanly() {
        let config = MediaConfig {
            port_min: 34000,
            port_max: 34019,
            ..MediaConfig::default()
        };
        let core = MediaCoreHandle::new(config).unwrap();
        core.allocate_session("sess-1", "call-1").await.unwrap();
        core.start_relay("sess-1", [0u8].into_iter().collect(), None, None).unwrap();
        core.shutdown().await;
    }

    #[tokio::test]
    async fn start_relay_on_unknown_session_errors() {
        let core = MediaCoreHandle::new(MediaConfig {
            port_min: 34020,
            port_max: 34039,
            ..MediaConfig::default()
        })
        .unwrap();
        let err = core.start_relay("missing", [0u8].into_iter().collect(), None, None);
        assert!(err.is_err());
    }
}
