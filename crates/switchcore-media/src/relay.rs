//! Bidirectional RTP relay: two single-reader/single-writer forwarder tasks
//! per session, one per direction, each learning its peer's symmetric-RTP
//! address from the first valid packet it sees.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use switchcore_rtp::{RtpHeader, Session};

use crate::recorder::Recorder;

/// Canonical payload-type allow-lists for the relay modes named in spec §4.3.
pub mod allowed {
    pub const PCMU_ONLY: [u8; 1] = [0];
    pub const PCMA_ONLY: [u8; 1] = [8];
    pub const OPUS_ONLY: [u8; 1] = [111];
    pub const DTMF_PAYLOAD_TYPE: u8 = 101;

    pub fn with_dtmf(audio_pt: u8) -> std::collections::HashSet<u8> {
        [audio_pt, DTMF_PAYLOAD_TYPE].into_iter().collect()
    }
}

const READ_DEADLINE: Duration = Duration::from_millis(100);
const MAX_UDP_PACKET: usize = 1500;

/// Per-direction symmetric-RTP learned remote, swapped atomically exactly
/// once by the forwarder that reads that direction's inbound traffic and
/// read by the forwarder writing the opposite direction's egress.
#[derive(Default)]
struct LearnedRemote(ArcSwapOption<SocketAddr>);

impl LearnedRemote {
    fn get(&self) -> Option<SocketAddr> {
        self.0.load().as_deref().copied()
    }

    /// One-shot: only the first learn takes effect, so a later spoofed
    /// source address cannot hijack an already-pinned peer.
    fn learn_once(&self, addr: SocketAddr) {
        if self.0.load().is_none() {
            self.0.store(Some(Arc::new(addr)));
        }
    }
}

/// A running bidirectional relay for one `Session`.
pub struct Relay {
    session: Arc<Session>,
    allowed_payload_types: HashSet<u8>,
    recorder: ArcSwapOption<Recorder>,
    caller_remote: Arc<LearnedRemote>,
    callee_remote: Arc<LearnedRemote>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Relay {
    pub fn new(session: Arc<Session>, allowed_payload_types: HashSet<u8>) -> Arc<Self> {
        Arc::new(Self {
            session,
            allowed_payload_types,
            recorder: ArcSwapOption::from(None),
            caller_remote: Arc::new(LearnedRemote::default()),
            callee_remote: Arc::new(LearnedRemote::default()),
            tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn set_recorder(&self, recorder: Arc<Recorder>) {
        self.recorder.store(Some(recorder));
    }

    /// Optionally seed a leg's remote address before any packet arrives
    /// (e.g. to permit SDP-signalled fallback); symmetric-RTP learning will
    /// overwrite this on the first inbound packet for that direction, same
    /// as any other one-shot learn.
    pub fn seed_caller_remote(&self, addr: SocketAddr) {
        self.caller_remote.learn_once(addr);
    }

    pub fn seed_callee_remote(&self, addr: SocketAddr) {
        self.callee_remote.learn_once(addr);
    }

    /// Start both forwarder tasks; transitions the session to `Active`.
    pub fn start(self: &Arc<Self>) {
        self.session.set_active();

        let fwd_a = forwarder_loop(
            self.clone(),
            Direction::CallerToCallee,
        );
        let fwd_b = forwarder_loop(
            self.clone(),
            Direction::CalleeToCaller,
        );

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(tokio::spawn(fwd_a));
        tasks.push(tokio::spawn(fwd_b));
    }

    /// Stop both forwarders and block until they exit. At most one
    /// `READ_DEADLINE` shutdown latency per forwarder.
    pub async fn stop(self: &Arc<Self>) {
        self.session.set_stopped();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock().unwrap());
        for h in handles {
            let _ = h.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    CallerToCallee,
    CalleeToCaller,
}

async fn forwarder_loop(relay: Arc<Relay>, direction: Direction) {
    let mut buf = vec![0u8; MAX_UDP_PACKET];

    loop {
        if relay.session.stopped_flag.load(Ordering::Acquire) {
            break;
        }

        let (read_socket, write_socket, read_remote, write_remote) = match direction {
            Direction::CallerToCallee => (
                &relay.session.leg_caller.rtp_conn,
                &relay.session.leg_callee.rtp_conn,
                &relay.caller_remote,
                &relay.callee_remote,
            ),
            Direction::CalleeToCaller => (
                &relay.session.leg_callee.rtp_conn,
                &relay.session.leg_caller.rtp_conn,
                &relay.callee_remote,
                &relay.caller_remote,
            ),
        };

        let recv = tokio::time::timeout(READ_DEADLINE, read_socket.recv_from(&mut buf)).await;
        let (n, src) = match recv {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => {
                warn!(?direction, error = %e, "relay read error");
                continue;
            }
            Err(_elapsed) => continue, // deadline tick: re-check Stopped flag
        };

        let raw = &buf[..n];

        if n < switchcore_rtp::HEADER_LEN {
            relay.session.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let payload_type = match RtpHeader::payload_type_of(raw) {
            Some(pt) => pt,
            None => {
                relay.session.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        if !relay.allowed_payload_types.contains(&payload_type) {
            relay.session.counters.packets_dropped.fetch_add(1, Ordering::Relaxed);
            trace!(?direction, payload_type, "dropped disallowed payload type");
            continue;
        }

        // Symmetric RTP: the first valid packet on this direction pins the
        // peer-direction's write target. One-shot per direction.
        read_remote.learn_once(src);

        if let Some(recorder) = relay.recorder.load().as_ref() {
            if raw.len() > switchcore_rtp::HEADER_LEN {
                recorder.feed(&raw[switchcore_rtp::HEADER_LEN..], payload_type);
            }
        }

        if let Some(dest) = write_remote.get() {
            match write_socket.send_to(raw, dest).await {
                Ok(_) => {
                    relay.session.touch_activity();
                    match direction {
                        Direction::CallerToCallee => {
                            relay.session.counters.packets_caller_to_callee.fetch_add(1, Ordering::Relaxed);
                            relay.session.counters.bytes_caller_to_callee.fetch_add(n as u64, Ordering::Relaxed);
                        }
                        Direction::CalleeToCaller => {
                            relay.session.counters.packets_callee_to_caller.fetch_add(1, Ordering::Relaxed);
                            relay.session.counters.bytes_callee_to_caller.fetch_add(n as u64, Ordering::Relaxed);
                        }
                    }
                }
                Err(e) => {
                    debug!(?direction, error = %e, "relay write failed, continuing");
                }
            }
        }
        // else: peer remote not learned yet, nothing to forward to.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use switchcore_rtp::{PortPool, SessionRegistry};

    async fn make_session(min: u16, max: u16) -> (StdArc<SessionRegistry>, StdArc<Session>) {
        let pool = StdArc::new(PortPool::new(min, max).unwrap());
        let registry = StdArc::new(SessionRegistry::new(pool));
        let session = registry.allocate("s1", "c1").await.unwrap();
        (registry, session)
    }

    #[tokio::test]
    async fn bidirectional_pcma_relay_exchanges_packets() {
        let (_registry, session) = make_session(30000, 30019).await;
        let caller_port = session.leg_caller.ports.rtp;
        let callee_port = session.leg_callee.ports.rtp;

        let relay = Relay::new(session, allowed::PCMA_ONLY.into_iter().collect());
        relay.start();

        let caller_phone = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let callee_phone = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let caller_leg_addr: SocketAddr = format!("127.0.0.1:{caller_port}").parse().unwrap();
        let callee_leg_addr: SocketAddr = format!("127.0.0.1:{callee_port}").parse().unwrap();

        // Caller sends first: callee leg has no learned remote yet, so
        // nothing should arrive at the callee phone.
        let mut pkt = vec![0x80u8, 8, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        pkt.extend_from_slice(&[0xD5, 0xD5]);
        caller_phone.send_to(&pkt, caller_leg_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let nothing = tokio::time::timeout(Duration::from_millis(200), callee_phone.recv_from(&mut buf)).await;
        assert!(nothing.is_err(), "callee must not receive before its remote is learned");

        // Callee sends: this both learns callee's remote and is forwarded... except
        // the caller's remote isn't learned yet either, so the first callee->caller
        // send also goes nowhere. It does, however, pin the callee's address.
        let mut callee_pkt = vec![0x80u8, 8, 0, 1, 0, 0, 0, 0, 0, 0, 0, 2];
        callee_pkt.extend_from_slice(&[0xAA, 0xBB]);
        callee_phone.send_to(&callee_pkt, callee_leg_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Now caller sends again: callee's remote was learned above, so this arrives.
        caller_phone.send_to(&pkt, caller_leg_addr).await.unwrap();
        let (n, _) = tokio::time::timeout(Duration::from_millis(500), callee_phone.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], &pkt[..]);

        relay.stop().await;
    }

    #[tokio::test]
    async fn disallowed_payload_type_is_dropped_and_counted() {
        let (_registry, session) = make_session(30100, 30119).await;
        let caller_port = session.leg_caller.ports.rtp;
        let callee_port = session.leg_callee.ports.rtp;
        let session_for_counters = session.clone();

        let relay = Relay::new(session, allowed::PCMA_ONLY.into_iter().collect());
        relay.start();

        let caller_phone = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let callee_phone = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let callee_leg_addr: SocketAddr = format!("127.0.0.1:{callee_port}").parse().unwrap();
        callee_phone.send_to(&[0x80, 8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0], callee_leg_addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let caller_leg_addr: SocketAddr = format!("127.0.0.1:{caller_port}").parse().unwrap();
        let pcmu_pkt = vec![0x80u8, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0xFF, 0xFF];
        caller_phone.send_to(&pcmu_pkt, caller_leg_addr).await.unwrap();

        let mut buf = [0u8; 64];
        let nothing = tokio::time::timeout(Duration::from_millis(200), callee_phone.recv_from(&mut buf)).await;
        assert!(nothing.is_err());
        assert!(session_for_counters.counters.packets_dropped.load(Ordering::Relaxed) >= 1);

        relay.stop().await;
    }
}
