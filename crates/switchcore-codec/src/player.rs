//! 20 ms paced RTP playout of a WAV prompt file.
//!
//! Wall-clock pacing (`expected(packetIndex * 20ms) - elapsed`) is used
//! instead of a fixed per-packet sleep so that per-packet processing jitter
//! does not accumulate into playback drift.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

use switchcore_rtp::RtpHeader;

use crate::g711::Variant;
use crate::wav::WavFile;

pub const SAMPLES_PER_PACKET: usize = 160;
pub const PACKET_TIME: Duration = Duration::from_millis(20);

/// Outcome of a (possibly cancelled) playback run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackResult {
    pub packets_sent: usize,
    pub cancelled: bool,
}

/// A cooperative cancellation flag shared with the task driving playback,
/// checked at the top of each packet loop (spec §4.8 / §5 cancellation model).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Plays `file` out over `socket` to `dest` as RTP, pacing one packet every
/// 20 ms. Returns a partial result reporting packets sent if `cancel` fires
/// mid-playback.
pub async fn play(
    file: &WavFile,
    socket: &UdpSocket,
    dest: SocketAddr,
    payload_type: u8,
    ssrc: u32,
    starting_sequence: u16,
    starting_timestamp: u32,
    cancel: &CancelToken,
) -> PlaybackResult {
    let variant = file.format.variant;
    let silence = variant.silence_byte();
    let start = Instant::now();
    let mut sequence = starting_sequence;
    let mut timestamp = starting_timestamp;
    let mut packets_sent = 0usize;

    let chunks: Vec<&[u8]> = file.samples.chunks(SAMPLES_PER_PACKET).collect();

    for (index, chunk) in chunks.iter().enumerate() {
        if cancel.is_cancelled() {
            return PlaybackResult {
                packets_sent,
                cancelled: true,
            };
        }

        let mut payload = chunk.to_vec();
        if payload.len() < SAMPLES_PER_PACKET {
            payload.resize(SAMPLES_PER_PACKET, silence);
        }

        let header = RtpHeader {
            marker: index == 0,
            payload_type,
            sequence,
            timestamp,
            ssrc,
        };
        let packet = header.to_bytes(&payload);
        if let Err(e) = socket.send_to(&packet, dest).await {
            debug!(error = %e, "player write failed, continuing");
        } else {
            packets_sent += 1;
        }

        sequence = sequence.wrapping_add(1);
        timestamp = timestamp.wrapping_add(SAMPLES_PER_PACKET as u32);

        let expected = start + PACKET_TIME * (index as u32 + 1);
        let now = Instant::now();
        if expected > now {
            tokio::time::sleep(expected - now).await;
        }
    }

    PlaybackResult {
        packets_sent,
        cancelled: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::WavFormat;

    #[tokio::test]
    async fn pads_short_final_packet_with_silence() {
        let file = WavFile {
            format: WavFormat { variant: Variant::Mulaw },
            samples: vec![0x11u8; 250], // 1 full packet + 90 short
        };
        let sock_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sock_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = sock_b.local_addr().unwrap();
        let cancel = CancelToken::new();

        let play_task = tokio::spawn(async move {
            play(&file, &sock_a, dest, 0, 0x1234, 0, 0, &cancel).await
        });

        let mut buf = [0u8; 2048];
        let (len1, _) = sock_b.recv_from(&mut buf).await.unwrap();
        assert_eq!(len1, 12 + SAMPLES_PER_PACKET);
        assert_eq!(buf[1] & 0x80, 0x80, "first packet must set the marker bit");

        let (len2, _) = sock_b.recv_from(&mut buf).await.unwrap();
        assert_eq!(len2, 12 + SAMPLES_PER_PACKET);
        assert_eq!(buf[1] & 0x80, 0, "subsequent packets must not set the marker bit");
        // Last 70 bytes of the second packet's payload are padding.
        let payload = &buf[12..12 + SAMPLES_PER_PACKET];
        assert!(payload[90..].iter().all(|&b| b == Variant::Mulaw.silence_byte()));

        let result = play_task.await.unwrap();
        assert_eq!(result.packets_sent, 2);
        assert!(!result.cancelled);
    }

    #[tokio::test]
    async fn cancellation_returns_partial_result() {
        let file = WavFile {
            format: WavFormat { variant: Variant::Mulaw },
            samples: vec![0u8; SAMPLES_PER_PACKET * 10],
        };
        let sock_a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let sock_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = sock_b.local_addr().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = play(&file, &sock_a, dest, 0, 1, 0, 0, &cancel).await;
        assert_eq!(result.packets_sent, 0);
        assert!(result.cancelled);
    }
}
