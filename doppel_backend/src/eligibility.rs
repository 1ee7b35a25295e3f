//! Decides whether the newest inbound message in a chat gets a reply.

use chrono::{DateTime, Duration, Utc};

use crate::bridge::InboundMessage;
use crate::database::SeenMarker;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    /// Nothing but our own messages in the page.
    NoCandidate,
    /// The newest inbound message is the one already handled.
    AlreadySeen,
    /// Too old to answer; mark it seen and move on.
    Stale { message: InboundMessage, age: Duration },
    Eligible(InboundMessage),
}

/// Evaluate one page of messages (newest first) against the chat's marker.
pub fn evaluate(
    messages: &[InboundMessage],
    marker: Option<&SeenMarker>,
    now: DateTime<Utc>,
    stale_after: Duration,
) -> Eligibility {
    let Some(candidate) = messages.iter().find(|m| !m.is_from_self) else {
        return Eligibility::NoCandidate;
    };

    if marker.is_some_and(|marker| marker.message_id == candidate.id) {
        return Eligibility::AlreadySeen;
    }

    let age = now - candidate.timestamp;
    if age > stale_after {
        return Eligibility::Stale {
            message: candidate.clone(),
            age,
        };
    }

    Eligibility::Eligible(candidate.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: Option<&str>, age_secs: i64, from_self: bool, now: DateTime<Utc>) -> InboundMessage {
        InboundMessage {
            id: id.map(str::to_string),
            text: format!("text-{}", id.unwrap_or("none")),
            sender: "ravi".to_string(),
            timestamp: now - Duration::seconds(age_secs),
            is_from_self: from_self,
        }
    }

    fn marker(id: Option<&str>) -> SeenMarker {
        SeenMarker {
            chat_id: "c1".to_string(),
            message_id: id.map(str::to_string),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn self_messages_are_never_candidates() {
        let now = Utc::now();
        let page = vec![msg(Some("m2"), 1, true, now), msg(Some("m1"), 2, true, now)];
        assert_eq!(evaluate(&page, None, now, Duration::seconds(30)), Eligibility::NoCandidate);
        assert_eq!(evaluate(&[], None, now, Duration::seconds(30)), Eligibility::NoCandidate);
    }

    #[test]
    fn newest_inbound_message_skips_over_own_reply() {
        let now = Utc::now();
        let page = vec![msg(Some("m3"), 1, true, now), msg(Some("m2"), 2, false, now)];
        match evaluate(&page, None, now, Duration::seconds(30)) {
            Eligibility::Eligible(m) => assert_eq!(m.id.as_deref(), Some("m2")),
            other => panic!("expected eligible, got {:?}", other),
        }
    }

    #[test]
    fn seen_marker_blocks_second_reply() {
        let now = Utc::now();
        let page = vec![msg(Some("m1"), 2, false, now)];
        let seen = marker(Some("m1"));
        assert_eq!(
            evaluate(&page, Some(&seen), now, Duration::seconds(30)),
            Eligibility::AlreadySeen
        );
        assert_eq!(
            evaluate(&page, Some(&seen), now, Duration::seconds(30)),
            Eligibility::AlreadySeen
        );
    }

    #[test]
    fn seen_marker_is_checked_before_staleness() {
        let now = Utc::now();
        let page = vec![msg(Some("m1"), 600, false, now)];
        assert_eq!(
            evaluate(&page, Some(&marker(Some("m1"))), now, Duration::seconds(30)),
            Eligibility::AlreadySeen
        );
    }

    #[test]
    fn staleness_threshold_boundaries() {
        let now = Utc::now();
        let old = vec![msg(Some("old"), 31, false, now)];
        let fresh = vec![msg(Some("fresh"), 29, false, now)];

        assert!(matches!(
            evaluate(&old, None, now, Duration::seconds(30)),
            Eligibility::Stale { ref message, .. } if message.id.as_deref() == Some("old")
        ));
        assert!(matches!(
            evaluate(&fresh, None, now, Duration::seconds(30)),
            Eligibility::Eligible(_)
        ));
    }

    #[test]
    fn null_ids_compare_against_a_null_marker() {
        let now = Utc::now();
        let page = vec![msg(None, 1, false, now)];
        assert!(matches!(
            evaluate(&page, None, now, Duration::seconds(30)),
            Eligibility::Eligible(_)
        ));
        assert_eq!(
            evaluate(&page, Some(&marker(None)), now, Duration::seconds(30)),
            Eligibility::AlreadySeen
        );
        assert!(matches!(
            evaluate(&page, Some(&marker(Some("m0"))), now, Duration::seconds(30)),
            Eligibility::Eligible(_)
        ));
    }
}
