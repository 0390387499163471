//! Call recording: a bounded queue of tapped RTP payloads drained by a
//! background writer that transcodes to μ-law and appends to a WAV file.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use switchcore_codec::{Variant, WavWriter};

use crate::error::Result;

pub const QUEUE_CAPACITY: usize = 128;
const SCRATCH_BYTES: usize = 8000; // one second at 8kHz mono u-law

struct QueueItem {
    payload: Bytes,
    payload_type: u8,
}

/// A single recorder: feed tagged RTP payloads in, get a rewritten-header
/// WAV file out. `feed` never blocks the caller — on a full queue it drops
/// the packet, leaving a recording gap rather than throttling media.
pub struct Recorder {
    tx: std::sync::Mutex<Option<mpsc::Sender<QueueItem>>>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,
    stopped: Arc<AtomicBool>,
    path: std::path::PathBuf,
    data_bytes: Arc<std::sync::atomic::AtomicU32>,
}

impl Recorder {
    /// Open `path` for writing (creating parent directories) and spawn the
    /// background writer task. `input_variant` is only used as a fallback
    /// when a tapped packet's own payload type can't be resolved; normally
    /// each queued item carries its own payload type.
    pub fn open(path: impl Into<std::path::PathBuf>, output_variant: Variant) -> Result<Self> {
        let path = path.into();
        let writer = WavWriter::create(&path, output_variant)?;
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let stopped = Arc::new(AtomicBool::new(false));
        let data_bytes = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let handle = tokio::spawn(writer_task(writer, rx, output_variant, data_bytes.clone()));

        Ok(Self {
            tx: std::sync::Mutex::new(Some(tx)),
            writer_handle: Mutex::new(Some(handle)),
            stopped,
            path,
            data_bytes,
        })
    }

    /// Non-blocking tap. Copies the payload (the caller may reuse its own
    /// buffer immediately after this call returns) and tries to enqueue it;
    /// silently drops on a full queue.
    pub fn feed(&self, payload: &[u8], payload_type: u8) {
        if self.stopped.load(Ordering::Acquire) {
            return;
        }
        let item = QueueItem {
            payload: Bytes::copy_from_slice(payload),
            payload_type,
        };
        let guard = self.tx.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            if tx.try_send(item).is_err() {
                debug!("recorder queue full, dropping packet (recording gap)");
            }
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Seconds of audio written so far (whole seconds, rounded down), valid
    /// even before `stop()`.
    pub fn duration_secs(&self) -> u32 {
        self.data_bytes.load(Ordering::Relaxed) / 8000
    }

    /// Stop the recorder: flush the remainder, rewrite the WAV header with
    /// the true data size, and close the file. Exactly-once: a second call
    /// is a no-op that returns the same path/duration.
    pub async fn stop(&self) -> (std::path::PathBuf, u32) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.tx.lock().unwrap().take(); // drop the sender so the writer's recv() returns None
            let handle = self.writer_handle.lock().await.take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
        }
        (self.path.clone(), self.duration_secs())
    }
}

async fn writer_task(
    mut writer: WavWriter<std::fs::File>,
    mut rx: mpsc::Receiver<QueueItem>,
    output_variant: Variant,
    data_bytes: Arc<std::sync::atomic::AtomicU32>,
) {
    let mut scratch: Vec<u8> = Vec::with_capacity(SCRATCH_BYTES);

    while let Some(item) = rx.recv().await {
        let in_variant = Variant::from_payload_type(item.payload_type).unwrap_or(output_variant);
        for &byte in item.payload.iter() {
            let sample = in_variant.decode_sample(byte);
            scratch.push(output_variant.encode_sample(sample));
        }
        if scratch.len() >= SCRATCH_BYTES {
            if let Err(e) = writer.write_samples(&scratch) {
                warn!(error = %e, "recorder write failed");
            } else {
                data_bytes.store(writer.data_bytes(), Ordering::Relaxed);
            }
            scratch.clear();
        }
    }

    if !scratch.is_empty() {
        if let Err(e) = writer.write_samples(&scratch) {
            warn!(error = %e, "recorder flush failed");
        }
    }
    if let Err(e) = writer.close() {
        warn!(error = %e, "recorder close failed");
    }
    data_bytes.store(writer.data_bytes(), Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn feeding_n_pcmu_payload_bytes_yields_n_data_bytes() {
        let dir = tempdir();
        let path = dir.join("call.wav");
        let recorder = Recorder::open(&path, Variant::Mulaw).unwrap();

        for _ in 0..50 {
            recorder.feed(&[0u8; 160], 0);
        }
        let (returned_path, duration) = recorder.stop().await;
        assert_eq!(returned_path, path);
        assert_eq!(duration, 1);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 44 + 8000);
        let data_size = u32::from_le_bytes(bytes[40..44].try_into().unwrap());
        assert_eq!(data_size, 8000);
    }

    #[tokio::test]
    async fn stop_is_exactly_once() {
        let dir = tempdir();
        let path = dir.join("call2.wav");
        let recorder = Recorder::open(&path, Variant::Mulaw).unwrap();
        recorder.feed(&[0xFFu8; 160], 0);
        let (p1, d1) = recorder.stop().await;
        let (p2, d2) = recorder.stop().await;
        assert_eq!(p1, p2);
        assert_eq!(d1, d2);
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("switchcore-recorder-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
