//! Loop prevention.
//!
//! Every packet the relay republishes carries the relay's reserved UID. When
//! the relay subscribes to the topic it publishes on, those packets come back;
//! they must never be buffered again.

use fmo_header::FmoHeader;

/// Returns `false` iff the packet was produced by this relay.
pub fn should_accept(header: &FmoHeader, relay_uid: u16) -> bool {
    header.uid != relay_uid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_with_uid(uid: u16) -> FmoHeader {
        FmoHeader {
            uid,
            callsign: "BD8BOJ".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_own_uid() {
        assert!(!should_accept(&header_with_uid(65535), 65535));
        assert!(!should_accept(&header_with_uid(7), 7));
    }

    #[test]
    fn accepts_other_uids() {
        assert!(should_accept(&header_with_uid(441), 65535));
        assert!(should_accept(&header_with_uid(0), 65535));
        assert!(should_accept(&header_with_uid(65534), 65535));
    }
}
