//! Header rewrite and republish of an expired batch.

use bytes::Bytes;
use fmo_header::{FmoHeader, HeaderError, HeaderUpdate, payload, rewrite_header};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::transport::{PublishError, Publisher};

/// Static relay identity applied to every republished packet.
#[derive(Debug, Clone)]
pub struct ReplaySettings {
    /// Reserved UID stamped on every republished packet.
    pub relay_uid: u16,
    /// Prepended to the original callsign.
    pub callsign_prefix: String,
    pub publish_topic: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("malformed packet: {0}")]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// Outcome counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
}

pub struct ReplayAction<P> {
    publisher: Arc<P>,
    settings: ReplaySettings,
}

impl<P: Publisher> ReplayAction<P> {
    pub fn new(publisher: Arc<P>, settings: ReplaySettings) -> Self {
        Self {
            publisher,
            settings,
        }
    }

    pub fn settings(&self) -> &ReplaySettings {
        &self.settings
    }

    /// Rewrite and publish every packet of `batch` in order.
    ///
    /// A failure on one packet is logged and counted; the rest of the batch
    /// is still processed. Publishes are awaited one at a time, so the batch
    /// order is kept even when the transport queue is full.
    pub async fn replay(&self, batch: &[Bytes]) -> ReplayStats {
        let mut stats = ReplayStats {
            total: batch.len(),
            ..Default::default()
        };

        for (i, packet) in batch.iter().enumerate() {
            let index = i + 1;
            match self.replay_one(packet).await {
                Ok((original, callsign)) => {
                    stats.succeeded += 1;
                    debug!(
                        index,
                        total = stats.total,
                        original_uid = original.uid,
                        original_callsign = %original.callsign,
                        uid = self.settings.relay_uid,
                        callsign = %callsign,
                        payload_len = payload(packet).map_or(0, <[u8]>::len),
                        "replayed packet"
                    );
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(index, total = stats.total, error = %e, "failed to replay packet");
                }
            }
        }

        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            total = stats.total,
            "replay complete"
        );
        stats
    }

    async fn replay_one(&self, packet: &Bytes) -> Result<(FmoHeader, String), ReplayError> {
        let original = FmoHeader::from_bytes(packet)?;
        let callsign = format!("{}{}", self.settings.callsign_prefix, original.callsign);

        let update = HeaderUpdate::new()
            .uid(self.settings.relay_uid)
            .callsign(callsign.clone());
        let rewritten = rewrite_header(packet, &update)?;

        self.publisher
            .publish(&self.settings.publish_topic, Bytes::from(rewritten))
            .await?;
        Ok((original, callsign))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingPublisher, packet, settings};
    use fmo_header::HEADER_SIZE;

    #[tokio::test]
    async fn rewrites_uid_and_callsign_and_keeps_payload() {
        let publisher = Arc::new(RecordingPublisher::new());
        let action = ReplayAction::new(Arc::clone(&publisher), settings());

        let stats = action
            .replay(&[packet(441, "BD8BOJ", &[0xDE, 0xAD, 0xBE, 0xEF])])
            .await;
        assert_eq!(
            stats,
            ReplayStats {
                succeeded: 1,
                failed: 0,
                total: 1
            }
        );

        let published = publisher.published();
        assert_eq!(published.len(), 1);
        let (topic, bytes) = &published[0];
        assert_eq!(topic, "FMO/RAW");

        let header = FmoHeader::from_bytes(bytes).unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.uid, 65535);
        assert_eq!(header.callsign, "RE>BD8BOJ");
        assert_eq!(&bytes[HEADER_SIZE..], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[tokio::test]
    async fn publishes_in_arrival_order() {
        let publisher = Arc::new(RecordingPublisher::new());
        let action = ReplayAction::new(Arc::clone(&publisher), settings());

        action.replay(&[
            packet(1, "AAA", b"1"),
            packet(2, "BBB", b"2"),
            packet(3, "CCC", b"3"),
        ])
        .await;

        let callsigns: Vec<String> = publisher
            .published()
            .iter()
            .map(|(_, b)| FmoHeader::from_bytes(b).unwrap().callsign)
            .collect();
        assert_eq!(callsigns, ["RE>AAA", "RE>BBB", "RE>CCC"]);
    }

    #[tokio::test]
    async fn publish_failure_does_not_abort_batch() {
        let publisher = Arc::new(RecordingPublisher::failing_on(&[2]));
        let action = ReplayAction::new(Arc::clone(&publisher), settings());

        let stats = action.replay(&[
            packet(1, "AAA", b""),
            packet(2, "BBB", b""),
            packet(3, "CCC", b""),
        ])
        .await;

        assert_eq!(
            stats,
            ReplayStats {
                succeeded: 2,
                failed: 1,
                total: 3
            }
        );
        assert_eq!(publisher.published().len(), 2);
        assert_eq!(publisher.attempts(), 3);
    }

    #[tokio::test]
    async fn malformed_packet_is_counted_and_skipped() {
        let publisher = Arc::new(RecordingPublisher::new());
        let action = ReplayAction::new(Arc::clone(&publisher), settings());

        let stats = action.replay(&[
            packet(1, "AAA", b""),
            Bytes::from_static(b"short"),
            packet(3, "CCC", b""),
        ])
        .await;

        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total, 3);
        assert_eq!(publisher.attempts(), 2);
    }

    #[tokio::test]
    async fn long_prefixed_callsign_is_truncated() {
        let publisher = Arc::new(RecordingPublisher::new());
        let action = ReplayAction::new(Arc::clone(&publisher), settings());

        action.replay(&[packet(9, "BD8BOJ/MOBILE", b"")]).await;

        let (_, bytes) = &publisher.published()[0];
        assert_eq!(FmoHeader::from_bytes(bytes).unwrap().callsign, "RE>BD8BOJ/MO");
    }

    #[tokio::test]
    async fn empty_batch_reports_zero() {
        let publisher = Arc::new(RecordingPublisher::new());
        let action = ReplayAction::new(publisher, settings());
        assert_eq!(action.replay(&[]).await, ReplayStats::default());
    }

    #[test]
    fn replay_error_messages() {
        let err = ReplayError::from(HeaderError::TooShort {
            expected: 22,
            actual: 3,
        });
        assert!(err.to_string().starts_with("malformed packet"));

        let err = ReplayError::from(PublishError::Closed);
        assert_eq!(err.to_string(), "transport is shut down");
    }
}
