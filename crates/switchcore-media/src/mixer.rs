//! N-way conference mixer: one 20 ms mix task per room, decoding each
//! participant's G.711 frame to linear PCM, summing N-1 per destination, and
//! re-encoding for that destination's negotiated codec.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::task::JoinHandle;
use tracing::debug;

use switchcore_codec::Variant;
use switchcore_rtp::{PortPool, RtpHeader, SocketPair, HEADER_LEN};

use crate::error::{Error, Result};
use crate::recorder::Recorder;

pub const SAMPLES_PER_FRAME: usize = 160;
pub const TICK_INTERVAL: Duration = Duration::from_millis(20);
const INGRESS_DEADLINE: Duration = Duration::from_millis(5);
const MIN_MIX_FRAME: usize = HEADER_LEN + 1;
const MAX_UDP_PACKET: usize = 1500;

struct ParticipantState {
    seq: u16,
    ts: u32,
    last_audio: [i16; SAMPLES_PER_FRAME],
    has_audio: bool,
}

/// One leg of a conference: an owned RTP socket, the learned symmetric-RTP
/// remote, and the running seq/ts/last-frame state only the mix task touches.
pub struct MixerParticipant {
    pub id: String,
    socket: SocketPair,
    remote: ArcSwapOption<SocketAddr>,
    payload_type: u8,
    ssrc: u32,
    state: std::sync::Mutex<ParticipantState>,
    muted: AtomicBool,
}

impl MixerParticipant {
    pub fn local_rtp_port(&self) -> u16 {
        self.socket.ports.rtp
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote.load().as_deref().copied()
    }

    fn learn_remote(&self, addr: SocketAddr) {
        if self.remote.load().is_none() {
            self.remote.store(Some(Arc::new(addr)));
        }
    }

    async fn ingress(&self) {
        let mut buf = [0u8; MAX_UDP_PACKET];
        let recv = tokio::time::timeout(INGRESS_DEADLINE, self.socket.rtp_conn.recv_from(&mut buf)).await;
        let (n, src) = match recv {
            Ok(Ok(v)) => v,
            _ => {
                self.state.lock().unwrap().has_audio = false;
                return;
            }
        };

        self.learn_remote(src);

        if n < MIN_MIX_FRAME || RtpHeader::payload_type_of(&buf[..n]) != Some(self.payload_type) {
            self.state.lock().unwrap().has_audio = false;
            return;
        }

        if self.muted.load(Ordering::Acquire) {
            self.state.lock().unwrap().has_audio = false;
            return;
        }

        let payload = &buf[HEADER_LEN..n];
        let sample_count = payload.len().min(SAMPLES_PER_FRAME);
        let variant = Variant::from_payload_type(self.payload_type).unwrap_or(Variant::Mulaw);

        let mut state = self.state.lock().unwrap();
        for i in 0..SAMPLES_PER_FRAME {
            state.last_audio[i] = if i < sample_count {
                variant.decode_sample(payload[i])
            } else {
                0
            };
        }
        state.has_audio = true;
    }

    /// Snapshot this participant's decoded frame for the mix phase, iff it
    /// contributed this cycle.
    fn contribution(&self) -> Option<[i16; SAMPLES_PER_FRAME]> {
        let state = self.state.lock().unwrap();
        state.has_audio.then_some(state.last_audio)
    }

    async fn egress(&self, acc: &[i32; SAMPLES_PER_FRAME], contributed: bool) {
        let (seq, ts) = {
            let mut state = self.state.lock().unwrap();
            let seq = state.seq;
            let ts = state.ts;
            state.seq = state.seq.wrapping_add(1);
            state.ts = state.ts.wrapping_add(SAMPLES_PER_FRAME as u32);
            (seq, ts)
        };

        if !contributed {
            return;
        }
        let Some(dest) = self.remote() else {
            return;
        };

        let variant = Variant::from_payload_type(self.payload_type).unwrap_or(Variant::Mulaw);
        let mut payload = [0u8; SAMPLES_PER_FRAME];
        for i in 0..SAMPLES_PER_FRAME {
            let clamped = acc[i].clamp(i16::MIN as i32, i16::MAX as i32) as i16;
            payload[i] = variant.encode_sample(clamped);
        }

        let header = RtpHeader {
            marker: false,
            payload_type: self.payload_type,
            sequence: seq,
            timestamp: ts,
            ssrc: self.ssrc,
        };
        let packet = header.to_bytes(&payload);
        if let Err(e) = self.socket.rtp_conn.send_to(&packet, dest).await {
            debug!(error = %e, participant = %self.id, "mixer egress write failed");
        }
    }
}

/// An in-flight injected tone: a pre-rendered PCM buffer drained 160 samples
/// at a time. Replacing it mid-playback (another `inject`) is last-writer-wins.
struct ToneBuffer {
    samples: Vec<i16>,
    position: usize,
}

impl ToneBuffer {
    fn generate(frequency_hz: f64, amplitude: f64, duration_ms: u64) -> Self {
        const SAMPLE_RATE: f64 = 8000.0;
        let amplitude = amplitude.clamp(0.0, 1.0);
        let total_samples = ((duration_ms as f64 / 1000.0) * SAMPLE_RATE).round() as usize;
        let samples = (0..total_samples)
            .map(|n| {
                let t = n as f64 / SAMPLE_RATE;
                let v = (2.0 * std::f64::consts::PI * frequency_hz * t).sin() * amplitude * i16::MAX as f64;
                v as i16
            })
            .collect();
        Self { samples, position: 0 }
    }

    fn take_frame(&mut self) -> [i16; SAMPLES_PER_FRAME] {
        let mut frame = [0i16; SAMPLES_PER_FRAME];
        let remaining = self.samples.len() - self.position;
        let take = remaining.min(SAMPLES_PER_FRAME);
        frame[..take].copy_from_slice(&self.samples[self.position..self.position + take]);
        self.position += take;
        frame
    }

    fn is_exhausted(&self) -> bool {
        self.position >= self.samples.len()
    }
}

/// A single conference room's mixer: one owned 20 ms tick task, a map of
/// live participants, an optional in-flight tone, and an optional full-mix
/// recording tap.
pub struct Mixer {
    room_id: String,
    pool: Arc<PortPool>,
    participants: std::sync::Mutex<HashMap<String, Arc<MixerParticipant>>>,
    tone: std::sync::Mutex<Option<ToneBuffer>>,
    recorder: ArcSwapOption<Recorder>,
    stopped: Arc<AtomicBool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Mixer {
    pub fn new(room_id: impl Into<String>, pool: Arc<PortPool>) -> Arc<Self> {
        Arc::new(Self {
            room_id: room_id.into(),
            pool,
            participants: std::sync::Mutex::new(HashMap::new()),
            tone: std::sync::Mutex::new(None),
            recorder: ArcSwapOption::from(None),
            stopped: Arc::new(AtomicBool::new(false)),
            task: std::sync::Mutex::new(None),
        })
    }

    pub fn set_recorder(&self, recorder: Arc<Recorder>) {
        self.recorder.store(Some(recorder));
    }

    pub fn take_recorder(&self) -> Option<Arc<Recorder>> {
        self.recorder.swap(None)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.lock().unwrap().len()
    }

    pub fn participant(&self, id: &str) -> Option<Arc<MixerParticipant>> {
        self.participants.lock().unwrap().get(id).cloned()
    }

    /// Allocate a fresh port pair and add `id` as a participant. Returns the
    /// local RTP port so the caller can rewrite SDP before answering.
    pub async fn join(&self, id: &str, payload_type: u8) -> Result<u16> {
        if self.participants.lock().unwrap().contains_key(id) {
            return Err(Error::DuplicateParticipant {
                bridge: self.room_id.clone(),
                participant: id.to_string(),
            });
        }
        let socket = self.pool.allocate().await?;
        let port = socket.ports.rtp;

        let participant = Arc::new(MixerParticipant {
            id: id.to_string(),
            socket,
            remote: ArcSwapOption::from(None),
            payload_type,
            ssrc: rand::random(),
            state: std::sync::Mutex::new(ParticipantState {
                seq: rand::random(),
                ts: rand::random(),
                last_audio: [0i16; SAMPLES_PER_FRAME],
                has_audio: false,
            }),
            muted: AtomicBool::new(false),
        });

        self.participants.lock().unwrap().insert(id.to_string(), participant);
        Ok(port)
    }

    /// Remove a participant and release its port pair back to the pool.
    pub fn leave(&self, id: &str) -> bool {
        let removed = self.participants.lock().unwrap().remove(id);
        if let Some(participant) = removed {
            self.pool.release(participant.socket.ports);
            true
        } else {
            false
        }
    }

    pub fn set_muted(&self, id: &str, muted: bool) -> bool {
        match self.participant(id) {
            Some(p) => {
                p.set_muted(muted);
                true
            }
            None => false,
        }
    }

    /// Replace any in-flight tone with a freshly rendered one (last writer wins).
    pub fn inject_tone(&self, frequency_hz: f64, amplitude: f64, duration_ms: u64) {
        let mut guard = self.tone.lock().unwrap();
        *guard = Some(ToneBuffer::generate(frequency_hz, amplitude, duration_ms));
    }

    /// Spawn the 20 ms tick task.
    pub fn start(self: &Arc<Self>) {
        let mixer = self.clone();
        let handle = tokio::spawn(async move { mixer.run().await });
        *self.task.lock().unwrap() = Some(handle);
    }

    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if self.stopped.load(Ordering::Acquire) {
                break;
            }
            self.tick_once().await;
        }
    }

    async fn tick_once(&self) {
        let participants: Vec<Arc<MixerParticipant>> = {
            let guard = self.participants.lock().unwrap();
            guard.values().cloned().collect()
        };
        if participants.is_empty() {
            return;
        }

        // Phase A: ingress.
        for p in &participants {
            p.ingress().await;
        }

        // Phase B: tone drain.
        let tone_frame = {
            let mut tone_guard = self.tone.lock().unwrap();
            match tone_guard.as_mut() {
                Some(tone) => {
                    let frame = tone.take_frame();
                    if tone.is_exhausted() {
                        *tone_guard = None;
                    }
                    Some(frame)
                }
                None => None,
            }
        };

        // Phase C: mix and egress, N-1 per destination.
        for dest in &participants {
            let mut acc = [0i32; SAMPLES_PER_FRAME];
            let mut contributed = false;
            for src in &participants {
                if Arc::ptr_eq(src, dest) {
                    continue;
                }
                if let Some(frame) = src.contribution() {
                    for i in 0..SAMPLES_PER_FRAME {
                        acc[i] += frame[i] as i32;
                    }
                    contributed = true;
                }
            }
            if let Some(tone) = tone_frame.as_ref() {
                for i in 0..SAMPLES_PER_FRAME {
                    acc[i] += tone[i] as i32;
                }
                contributed = true;
            }
            dest.egress(&acc, contributed).await;
        }

        // Optional full-mix recording tap: every contributor, not N-1.
        if let Some(recorder) = self.recorder.load().as_ref() {
            let mut room_acc = [0i32; SAMPLES_PER_FRAME];
            for p in &participants {
                if let Some(frame) = p.contribution() {
                    for i in 0..SAMPLES_PER_FRAME {
                        room_acc[i] += frame[i] as i32;
                    }
                }
            }
            if let Some(tone) = tone_frame.as_ref() {
                for i in 0..SAMPLES_PER_FRAME {
                    room_acc[i] += tone[i] as i32;
                }
            }
            let mut encoded = [0u8; SAMPLES_PER_FRAME];
            for i in 0..SAMPLES_PER_FRAME {
                let clamped = room_acc[i].clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                encoded[i] = Variant::Mulaw.encode_sample(clamped);
            }
            recorder.feed(&encoded, Variant::Mulaw.payload_type());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    async fn send_pcma_frame(sock: &UdpSocket, dest: SocketAddr, fill: u8) {
        let mut pkt = vec![0x80u8, 8, 0, 1, 0, 0, 0, 1, 0, 0, 0, 1];
        pkt.extend_from_slice(&[fill; SAMPLES_PER_FRAME]);
        sock.send_to(&pkt, dest).await.unwrap();
    }

    #[tokio::test]
    async fn two_participants_each_hear_the_other() {
        let pool = Arc::new(PortPool::new(31000, 31039).unwrap());
        let mixer = Mixer::new("room", pool);
        let port_a = mixer.join("a", 8).await.unwrap();
        let port_b = mixer.join("b", 8).await.unwrap();

        let phone_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let phone_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr_a: SocketAddr = format!("127.0.0.1:{port_a}").parse().unwrap();
        let addr_b: SocketAddr = format!("127.0.0.1:{port_b}").parse().unwrap();

        // Seed the mixer's learned remote for each leg with a throwaway probe
        // before starting the tick loop, matching symmetric-RTP pre-learning.
        send_pcma_frame(&phone_a, addr_a, 0xD5).await;
        send_pcma_frame(&phone_b, addr_b, 0x55).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        mixer.start();

        send_pcma_frame(&phone_a, addr_a, 0xD5).await; // A: silence
        send_pcma_frame(&phone_b, addr_b, 0x55).await; // B: tone-ish byte

        let mut buf = [0u8; 256];
        let (n, _) = tokio::time::timeout(Duration::from_millis(200), phone_a.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, HEADER_LEN + SAMPLES_PER_FRAME);
        assert_eq!(buf[1] & 0x7F, 8);

        mixer.stop().await;
    }

    #[tokio::test]
    async fn silent_cycle_still_advances_sequence_without_sending() {
        let pool = Arc::new(PortPool::new(31100, 31139).unwrap());
        let mixer = Mixer::new("room", pool);
        mixer.join("solo", 0).await.unwrap();
        let participant = mixer.participant("solo").unwrap();
        let seq_before = participant.state.lock().unwrap().seq;

        mixer.tick_once().await;

        let seq_after = participant.state.lock().unwrap().seq;
        assert_eq!(seq_after, seq_before.wrapping_add(1));
    }

    #[tokio::test]
    async fn mute_excludes_contribution_but_still_learns_remote() {
        let pool = Arc::new(PortPool::new(31200, 31239).unwrap());
        let mixer = Mixer::new("room", pool);
        let port = mixer.join("muted-one", 8).await.unwrap();
        mixer.set_muted("muted-one", true);

        let phone = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        send_pcma_frame(&phone, addr, 0xD5).await;

        mixer.tick_once().await;

        let participant = mixer.participant("muted-one").unwrap();
        assert!(participant.remote().is_some(), "muted participant's address is still learned");
        assert!(!participant.state.lock().unwrap().has_audio, "muted participant contributes nothing");
    }

    #[tokio::test]
    async fn leave_releases_port_for_reuse() {
        let pool = Arc::new(PortPool::new(31300, 31303).unwrap()); // capacity 2
        let mixer = Mixer::new("room", pool);
        mixer.join("x", 0).await.unwrap();
        assert!(mixer.join("y", 0).await.is_err()); // pool exhausted
        mixer.leave("x");
        assert!(mixer.join("y", 0).await.is_ok());
    }

    #[test]
    fn tone_buffer_drains_in_160_sample_frames_then_exhausts() {
        let mut tone = ToneBuffer::generate(440.0, 0.5, 20); // exactly one frame at 8kHz
        assert_eq!(tone.samples.len(), SAMPLES_PER_FRAME);
        let frame = tone.take_frame();
        assert!(frame.iter().any(|&s| s != 0));
        assert!(tone.is_exhausted());
    }
}
