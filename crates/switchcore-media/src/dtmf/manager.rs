//! Per-call DTMF fan-in: a bounded channel per callId shared by the RFC 4733
//! collector and the SIP INFO parser, read by exactly one Digit Buffer.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;

pub const CHANNEL_CAPACITY: usize = 32;

/// A cloneable read handle onto one call's DTMF channel. Cloning does not
/// duplicate the channel: every clone shares the same underlying receiver
/// behind an async mutex, matching Acquire's idempotent-return contract.
#[derive(Clone)]
pub struct DtmfChannel {
    rx: Arc<AsyncMutex<mpsc::Receiver<char>>>,
}

impl DtmfChannel {
    pub async fn recv(&self) -> Option<char> {
        self.rx.lock().await.recv().await
    }

    /// Non-blocking receive; `None` on empty or if another reader currently
    /// holds the lock.
    pub fn try_recv(&self) -> Option<char> {
        self.rx.try_lock().ok().and_then(|mut guard| guard.try_recv().ok())
    }
}

struct Entry {
    tx: mpsc::Sender<char>,
    channel: DtmfChannel,
}

/// Owns, per callId, a bounded channel (capacity 32) that RFC 4733 and SIP
/// INFO both feed and a Digit Buffer drains.
pub struct CallDtmfManager {
    channels: std::sync::RwLock<HashMap<String, Entry>>,
}

impl Default for CallDtmfManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CallDtmfManager {
    pub fn new() -> Self {
        Self {
            channels: std::sync::RwLock::new(HashMap::new()),
        }
    }

    /// Idempotent: repeated Acquires for the same callId return a handle to
    /// the same channel rather than creating a new one.
    pub fn acquire(&self, call_id: &str) -> DtmfChannel {
        if let Some(entry) = self.channels.read().unwrap().get(call_id) {
            return entry.channel.clone();
        }
        let mut guard = self.channels.write().unwrap();
        if let Some(entry) = guard.get(call_id) {
            return entry.channel.clone();
        }
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let channel = DtmfChannel {
            rx: Arc::new(AsyncMutex::new(rx)),
        };
        guard.insert(
            call_id.to_string(),
            Entry {
                tx,
                channel: channel.clone(),
            },
        );
        channel
    }

    /// Removes the mapping; later Injects to this callId drop silently.
    pub fn release(&self, call_id: &str) {
        self.channels.write().unwrap().remove(call_id);
    }

    /// Non-blocking fan-in from either DTMF source. Drops on a full channel
    /// or on an absent callId.
    pub fn inject(&self, call_id: &str, digit: char) {
        let guard = self.channels.read().unwrap();
        match guard.get(call_id) {
            Some(entry) => {
                if entry.tx.try_send(digit).is_err() {
                    debug!(call_id, "dtmf channel full or closed, dropping digit");
                }
            }
            None => debug!(call_id, "dtmf inject to unknown call, dropping digit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_is_idempotent_and_injects_fan_in() {
        let mgr = CallDtmfManager::new();
        let a = mgr.acquire("call-1");
        let b = mgr.acquire("call-1");

        mgr.inject("call-1", '1');
        mgr.inject("call-1", '2');

        assert_eq!(a.recv().await, Some('1'));
        assert_eq!(b.recv().await, Some('2'));
    }

    #[test]
    fn inject_to_unknown_call_is_a_silent_drop() {
        let mgr = CallDtmfManager::new();
        mgr.inject("ghost", '9'); // must not panic
    }

    #[tokio::test]
    async fn release_then_inject_drops_silently() {
        let mgr = CallDtmfManager::new();
        let channel = mgr.acquire("call-2");
        mgr.release("call-2");
        mgr.inject("call-2", '5');
        assert_eq!(channel.try_recv(), None);
    }

    #[tokio::test]
    async fn full_channel_drops_rather_than_blocks() {
        let mgr = CallDtmfManager::new();
        let channel = mgr.acquire("call-3");
        for _ in 0..CHANNEL_CAPACITY {
            mgr.inject("call-3", '1');
        }
        mgr.inject("call-3", '9'); // dropped, channel full
        let mut count = 0;
        while channel.try_recv().is_some() {
            count += 1;
        }
        assert_eq!(count, CHANNEL_CAPACITY);
    }
}
