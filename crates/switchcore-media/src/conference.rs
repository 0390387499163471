//! Conference Manager: creates and destroys rooms on first-join/last-leave,
//! enforces per-room membership caps, and announces joins/leaves with tones.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::info;

use switchcore_codec::{Variant, WavWriter};
use switchcore_rtp::PortPool;

use crate::error::{Error, Result};
use crate::mixer::Mixer;
use crate::recorder::Recorder;

const JOIN_TONE_HZ: f64 = 440.0;
const JOIN_TONE_MS: u64 = 200;
const LEAVE_TONE_HZ: f64 = 440.0;
const LEAVE_TONE_MS: u64 = 100;
const TONE_AMPLITUDE: f64 = 0.25;

/// Per-room configuration decided at creation time (first Join).
#[derive(Debug, Clone)]
pub struct RoomOptions {
    pub max_members: usize,
    pub announce_joins: bool,
    pub recording_path: Option<std::path::PathBuf>,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            max_members: 0, // 0 means unlimited
            announce_joins: false,
            recording_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParticipantInfo {
    pub call_id: String,
    pub joined_at: SystemTime,
    pub muted: bool,
}

struct Room {
    bridge_name: String,
    mixer: Arc<Mixer>,
    options: RoomOptions,
    participants: HashMap<String, ParticipantInfo>,
}

/// Owns every live room keyed by bridge id behind a single mutex (spec: "one
/// mutex guarding the bridgeId -> Room map"); the mixer's own internal state
/// and the mute flag within it use finer-grained locking.
pub struct ConferenceManager {
    pool: Arc<PortPool>,
    rooms: std::sync::Mutex<HashMap<String, Room>>,
}

impl ConferenceManager {
    pub fn new(pool: Arc<PortPool>) -> Self {
        Self {
            pool,
            rooms: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().unwrap().len()
    }

    pub fn participant_count(&self, bridge_id: &str) -> Option<usize> {
        self.rooms.lock().unwrap().get(bridge_id).map(|r| r.participants.len())
    }

    /// Join `call_id` to `bridge_id`, creating the room on first join.
    /// Returns the local RTP port the caller should put into the answer SDP.
    pub async fn join(
        &self,
        bridge_id: &str,
        bridge_name: &str,
        call_id: &str,
        payload_type: u8,
        options: RoomOptions,
    ) -> Result<u16> {
        let mixer = {
            let mut rooms = self.rooms.lock().unwrap();
            if let Some(room) = rooms.get(bridge_id) {
                if room.options.max_members > 0 && room.participants.len() >= room.options.max_members {
                    return Err(Error::ConferenceFull(bridge_id.to_string()));
                }
                room.mixer.clone()
            } else {
                let mixer = Mixer::new(bridge_id, self.pool.clone());
                mixer.start();
                if let Some(path) = &options.recording_path {
                    if let Ok(recorder) = Recorder::open(path, Variant::Mulaw) {
                        mixer.set_recorder(Arc::new(recorder));
                    }
                }
                rooms.insert(
                    bridge_id.to_string(),
                    Room {
                        bridge_name: bridge_name.to_string(),
                        mixer: mixer.clone(),
                        options: options.clone(),
                        participants: HashMap::new(),
                    },
                );
                info!(bridge_id, bridge_name, "conference room created");
                mixer
            }
        };

        let port = mixer.join(call_id, payload_type).await?;

        let mut rooms = self.rooms.lock().unwrap();
        if let Some(room) = rooms.get_mut(bridge_id) {
            room.participants.insert(
                call_id.to_string(),
                ParticipantInfo {
                    call_id: call_id.to_string(),
                    joined_at: SystemTime::now(),
                    muted: false,
                },
            );
            if room.options.announce_joins {
                room.mixer.inject_tone(JOIN_TONE_HZ, TONE_AMPLITUDE, JOIN_TONE_MS);
            }
        }

        Ok(port)
    }

    /// Remove `call_id` from `bridge_id`. Destroys the room when the last
    /// participant leaves, finalizing its recording if one is running.
    pub async fn leave(&self, bridge_id: &str, call_id: &str) -> Result<()> {
        let (mixer, announce, is_last, recorder) = {
            let mut rooms = self.rooms.lock().unwrap();
            let room = rooms
                .get_mut(bridge_id)
                .ok_or_else(|| Error::UnknownConference(bridge_id.to_string()))?;
            room.participants.remove(call_id);
            room.mixer.leave(call_id);
            let is_last = room.participants.is_empty();
            let announce = room.options.announce_joins && !is_last;
            let recorder = if is_last { room.mixer.take_recorder() } else { None };
            (room.mixer.clone(), announce, is_last, recorder)
        };

        if announce {
            mixer.inject_tone(LEAVE_TONE_HZ, TONE_AMPLITUDE, LEAVE_TONE_MS);
        }

        if is_last {
            mixer.stop().await;
            if let Some(recorder) = recorder {
                recorder.stop().await;
            }
            self.rooms.lock().unwrap().remove(bridge_id);
            info!(bridge_id, "conference room destroyed");
        }

        Ok(())
    }

    /// Forced leave, distinguished from a voluntary `leave` only by the log
    /// line an audit trail would key on.
    pub async fn kick(&self, bridge_id: &str, call_id: &str, reason: &str) -> Result<()> {
        info!(bridge_id, call_id, reason, "participant kicked from conference");
        self.leave(bridge_id, call_id).await
    }

    pub fn mute(&self, bridge_id: &str, call_id: &str, muted: bool) -> Result<()> {
        let mut rooms = self.rooms.lock().unwrap();
        let room = rooms
            .get_mut(bridge_id)
            .ok_or_else(|| Error::UnknownConference(bridge_id.to_string()))?;
        if !room.mixer.set_muted(call_id, muted) {
            return Err(Error::UnknownConference(format!("{bridge_id}/{call_id}")));
        }
        if let Some(info) = room.participants.get_mut(call_id) {
            info.muted = muted;
        }
        Ok(())
    }

    pub fn participants(&self, bridge_id: &str) -> Option<Vec<ParticipantInfo>> {
        self.rooms
            .lock()
            .unwrap()
            .get(bridge_id)
            .map(|r| r.participants.values().cloned().collect())
    }

    pub fn bridge_name(&self, bridge_id: &str) -> Option<String> {
        self.rooms.lock().unwrap().get(bridge_id).map(|r| r.bridge_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_manager(min: u16, max: u16) -> ConferenceManager {
        let pool = Arc::new(PortPool::new(min, max).unwrap());
        ConferenceManager::new(pool)
    }

    #[tokio::test]
    async fn first_join_creates_room_last_leave_destroys_it() {
        let mgr = new_manager(32000, 32039);
        mgr.join("bridge-1", "Sales", "call-a", 0, RoomOptions::default()).await.unwrap();
        assert_eq!(mgr.room_count(), 1);
        mgr.join("bridge-1", "Sales", "call-b", 0, RoomOptions::default()).await.unwrap();
        assert_eq!(mgr.participant_count("bridge-1"), Some(2));

        mgr.leave("bridge-1", "call-a").await.unwrap();
        assert_eq!(mgr.room_count(), 1);
        mgr.leave("bridge-1", "call-b").await.unwrap();
        assert_eq!(mgr.room_count(), 0);
    }

    #[tokio::test]
    async fn join_rejects_once_room_is_full() {
        let mgr = new_manager(32100, 32139);
        let options = RoomOptions {
            max_members: 1,
            ..RoomOptions::default()
        };
        mgr.join("bridge-2", "Support", "call-a", 0, options.clone()).await.unwrap();
        let err = mgr.join("bridge-2", "Support", "call-b", 0, options).await.unwrap_err();
        assert!(matches!(err, Error::ConferenceFull(_)));
    }

    #[tokio::test]
    async fn leave_unknown_bridge_errors() {
        let mgr = new_manager(32200, 32239);
        let err = mgr.leave("ghost", "call-a").await.unwrap_err();
        assert!(matches!(err, Error::UnknownConference(_)));
    }

    #[tokio::test]
    async fn mute_toggles_participant_record_and_mixer_flag() {
        let mgr = new_manager(32300, 32339);
        mgr.join("bridge-3", "Ops", "call-a", 0, RoomOptions::default()).await.unwrap();
        mgr.mute("bridge-3", "call-a", true).unwrap();
        let participants = mgr.participants("bridge-3").unwrap();
        assert!(participants.iter().find(|p| p.call_id == "call-a").unwrap().muted);
    }
}
