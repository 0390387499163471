//! Timeout-driven digit collection: first-digit/inter-digit timers,
//! max-digits cutoff, a terminator digit, and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::dtmf::manager::DtmfChannel;

#[derive(Debug, Clone)]
pub struct DigitBufferConfig {
    pub first_digit_timeout: Duration,
    pub inter_digit_timeout: Duration,
    pub max_digits: Option<usize>,
    pub terminator: Option<char>,
}

impl Default for DigitBufferConfig {
    fn default() -> Self {
        Self {
            first_digit_timeout: Duration::from_secs(5),
            inter_digit_timeout: Duration::from_secs(3),
            max_digits: None,
            terminator: None,
        }
    }
}

/// Result of one `DigitBuffer::collect` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectOutcome {
    pub digits: String,
    pub timed_out: bool,
    pub terminated: bool,
}

/// Cooperative cancellation for an in-flight collection; a cancel issued
/// before `collect` starts is still observed (one stored permit), matching
/// the reaper's stop-signal shape in the session registry.
#[derive(Clone, Default)]
pub struct CancelToken {
    notify: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }

    async fn wait(&self) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        self.notify.notified().await;
    }
}

pub struct DigitBuffer;

impl DigitBuffer {
    /// Drives the first-digit/inter-digit/max-digits/terminator state
    /// machine against `channel` until one of the termination rules fires.
    pub async fn collect(channel: &DtmfChannel, config: DigitBufferConfig, cancel: &CancelToken) -> CollectOutcome {
        let mut digits = String::new();
        let mut timeout = config.first_digit_timeout;

        loop {
            tokio::select! {
                _ = cancel.wait() => {
                    return CollectOutcome { digits, timed_out: true, terminated: false };
                }
                received = channel.recv() => {
                    match received {
                        None => {
                            return CollectOutcome { digits, timed_out: false, terminated: false };
                        }
                        Some(digit) => {
                            // Terminator check happens before the max-digits count.
                            if config.terminator == Some(digit) {
                                return CollectOutcome { digits, timed_out: false, terminated: true };
                            }
                            digits.push(digit);
                            timeout = config.inter_digit_timeout;
                            if let Some(max) = config.max_digits {
                                if digits.len() >= max {
                                    return CollectOutcome { digits, timed_out: false, terminated: false };
                                }
                            }
                        }
                    }
                }
                _ = tokio::time::sleep(timeout) => {
                    return CollectOutcome { digits, timed_out: true, terminated: false };
                }
            }
        }
    }
}
