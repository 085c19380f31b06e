//! Timestamp-based conflict policy.
//!
//! Timestamps are compared at millisecond resolution. Equal timestamps mean
//! "already consistent": two edits inside the same millisecond (or inside the
//! coarser resolution of some stores) are indistinguishable from no edit.

use chrono::{DateTime, Utc};

/// Direction chosen for one file in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    Upload,
    Download,
    Skip,
}

/// Decide how to reconcile a local file with its blob.
///
/// Returns `None` when neither side exists.
pub fn decide(
    local: Option<DateTime<Utc>>,
    remote: Option<DateTime<Utc>>,
) -> Option<SyncDecision> {
    match (local, remote) {
        (None, None) => None,
        (Some(_), None) => Some(SyncDecision::Upload),
        (None, Some(_)) => Some(SyncDecision::Download),
        (Some(local), Some(remote)) => {
            let (local, remote) = (local.timestamp_millis(), remote.timestamp_millis());
            Some(if local > remote {
                SyncDecision::Upload
            } else if remote > local {
                SyncDecision::Download
            } else {
                SyncDecision::Skip
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ms(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).unwrap()
    }

    #[test]
    fn missing_blob_uploads() {
        assert_eq!(decide(Some(ms(1)), None), Some(SyncDecision::Upload));
    }

    #[test]
    fn missing_local_downloads() {
        assert_eq!(decide(None, Some(ms(1))), Some(SyncDecision::Download));
    }

    #[test]
    fn neither_side_is_none() {
        assert_eq!(decide(None, None), None);
    }

    #[test]
    fn ordering_holds_across_a_grid_of_timestamps() {
        let samples = [0i64, 1, 999, 1_000, 1_700_000_000_000, 1_700_000_000_001];
        for &local in &samples {
            for &remote in &samples {
                let expected = match local.cmp(&remote) {
                    std::cmp::Ordering::Greater => SyncDecision::Upload,
                    std::cmp::Ordering::Less => SyncDecision::Download,
                    std::cmp::Ordering::Equal => SyncDecision::Skip,
                };
                assert_eq!(
                    decide(Some(ms(local)), Some(ms(remote))),
                    Some(expected),
                    "local={local} remote={remote}"
                );
            }
        }
    }

    #[test]
    fn sub_millisecond_difference_is_equal() {
        let base = ms(1_700_000_000_000);
        let later = base + chrono::Duration::microseconds(400);
        assert_eq!(decide(Some(later), Some(base)), Some(SyncDecision::Skip));
    }
}
