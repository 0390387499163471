//! RFC 4733 telephone-event collector: a dedicated-socket read loop with a
//! 50 ms deadline, filtering to end-bit events and deduplicating retransmits.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::trace;

use switchcore_rtp::{RtpHeader, TelephoneEvent};

use crate::dtmf::manager::CallDtmfManager;

const READ_DEADLINE: Duration = Duration::from_millis(50);
const MAX_UDP_PACKET: usize = 1500;
pub const DEFAULT_PAYLOAD_TYPE: u8 = 101;

/// Runs a read loop against one call's telephone-event socket and injects
/// deduplicated digits into the DTMF manager's fan-in channel.
pub struct Rfc4733Collector {
    call_id: String,
    socket: Arc<UdpSocket>,
    payload_type: u8,
    stopped: Arc<AtomicBool>,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Rfc4733Collector {
    pub fn new(call_id: impl Into<String>, socket: Arc<UdpSocket>, payload_type: u8) -> Self {
        Self {
            call_id: call_id.into(),
            socket,
            payload_type,
            stopped: Arc::new(AtomicBool::new(false)),
            task: std::sync::Mutex::new(None),
        }
    }

    pub fn start(&self, manager: Arc<CallDtmfManager>) {
        let call_id = self.call_id.clone();
        let socket = self.socket.clone();
        let payload_type = self.payload_type;
        let stopped = self.stopped.clone();

        let handle = tokio::spawn(async move {
            read_loop(call_id, socket, payload_type, stopped, manager).await;
        });
        *self.task.lock().unwrap() = Some(handle);
    }

    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn read_loop(
    call_id: String,
    socket: Arc<UdpSocket>,
    payload_type: u8,
    stopped: Arc<AtomicBool>,
    manager: Arc<CallDtmfManager>,
) {
    let mut buf = [0u8; MAX_UDP_PACKET];
    let mut last_emitted: Option<(u8, u32)> = None;

    loop {
        if stopped.load(Ordering::Acquire) {
            break;
        }

        let recv: Result<Result<(usize, SocketAddr), std::io::Error>, _> =
            tokio::time::timeout(READ_DEADLINE, socket.recv_from(&mut buf)).await;
        let (n, _src) = match recv {
            Ok(Ok(v)) => v,
            Ok(Err(_)) => continue,
            Err(_elapsed) => continue,
        };

        let Some((header, payload)) = RtpHeader::parse(&buf[..n]) else {
            continue;
        };
        if header.payload_type != payload_type {
            continue;
        }
        let Some(event) = TelephoneEvent::parse(payload) else {
            continue;
        };
        if !event.end_of_event {
            continue;
        }

        let key = (event.event, header.timestamp);
        if last_emitted == Some(key) {
            continue;
        }
        last_emitted = Some(key);

        let digit = TelephoneEvent::digit_char(event.event);
        trace!(call_id, %digit, "rfc4733 digit collected");
        manager.inject(&call_id, digit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn end_bit_event_emits_one_digit_and_dedups_retransmits() {
        let manager = Arc::new(CallDtmfManager::new());
        manager.acquire("call-1");

        let sock_a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let sock_b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = sock_a.local_addr().unwrap();

        let collector = Rfc4733Collector::new("call-1", sock_a, DEFAULT_PAYLOAD_TYPE);
        collector.start(manager.clone());

        let header = RtpHeader::new(DEFAULT_PAYLOAD_TYPE, 1, 800, 0xCAFE);
        let event = TelephoneEvent {
            event: 5,
            end_of_event: true,
            volume: 10,
            duration: 800,
        };
        let packet = header.to_bytes(&event.to_bytes());

        sock_b.send_to(&packet, dest).await.unwrap();
        sock_b.send_to(&packet, dest).await.unwrap();
        sock_b.send_to(&packet, dest).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut header2 = header;
        header2.timestamp = 1600;
        let packet2 = header2.to_bytes(&event.to_bytes());
        sock_b.send_to(&packet2, dest).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        collector.stop().await;

        let rx = manager.acquire("call-1");
        let mut digits = Vec::new();
        while let Some(d) = rx.try_recv() {
            digits.push(d);
        }
        assert_eq!(digits, vec!['5', '5']);
    }
}
