use bytes::Bytes;
use fmo_header::FmoHeader;
use std::sync::Mutex;
use tokio::sync::Notify;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::replay::ReplaySettings;
use crate::transport::{PublishError, Publisher};

/// Publisher that records every successful publish in memory.
///
/// `failing_on` takes 1-based attempt numbers that should be rejected.
#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Bytes)>>,
    attempts: AtomicUsize,
    fail_on: Vec<usize>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(attempts: &[usize]) -> Self {
        Self {
            fail_on: attempts.to_vec(),
            ..Default::default()
        }
    }

    pub fn published(&self) -> Vec<(String, Bytes)> {
        self.published.lock().expect("publisher lock").clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Publisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&attempt) {
            return Err(PublishError::Rejected(format!("attempt {attempt}")));
        }
        self.published
            .lock()
            .expect("publisher lock")
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// Publisher that parks inside `publish` until the test opens the gate.
#[derive(Default)]
pub struct GatedPublisher {
    pub inner: RecordingPublisher,
    /// Signalled when a publish call is waiting at the gate.
    pub entered: Notify,
    /// Each permit lets one parked publish through.
    pub gate: Notify,
}

impl Publisher for GatedPublisher {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<(), PublishError> {
        self.entered.notify_one();
        self.gate.notified().await;
        self.inner.publish(topic, payload).await
    }
}

/// Build a raw packet with version 1 and the given uid, callsign and payload.
pub fn packet(uid: u16, callsign: &str, payload: &[u8]) -> Bytes {
    let header = FmoHeader {
        version: 1,
        uid,
        callsign: callsign.to_string(),
        ..Default::default()
    };
    let mut bytes = header.to_bytes().to_vec();
    bytes.extend_from_slice(payload);
    Bytes::from(bytes)
}

pub fn settings() -> ReplaySettings {
    ReplaySettings {
        relay_uid: 65535,
        callsign_prefix: "RE>".to_string(),
        publish_topic: "FMO/RAW".to_string(),
    }
}
