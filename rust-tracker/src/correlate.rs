//! Reply correlation: pair inbound messages with outstanding sends.
//!
//! Matching is a substring test of the normalized sent-to address against the
//! normalized from-address, so display-name wrapping such as
//! `"Alice" <alice@co.com>` still matches `alice@co.com`. An address that is a
//! substring of an unrelated one will also match; that imprecision is accepted.
//!
//! When the same recipient has several outstanding sends, every one of them
//! is paired with the reply. There is no disambiguation by timestamp.

use std::collections::HashSet;

use uuid::Uuid;

use crate::model::{normalize_address, InboundMessage, TrackingEntry};

/// Match `inbound` against the outstanding subset of `entries`.
///
/// Entries already replied are ignored. Each entry appears at most once,
/// paired with the first message (in input order) that matches it.
pub fn correlate(
    entries: &[TrackingEntry],
    inbound: &[InboundMessage],
) -> Vec<(TrackingEntry, InboundMessage)> {
    let outstanding: Vec<(&TrackingEntry, String)> = entries
        .iter()
        .filter(|e| e.is_outstanding())
        .map(|e| (e, normalize_address(&e.recipient)))
        .filter(|(_, addr)| !addr.is_empty())
        .collect();

    if outstanding.is_empty() || inbound.is_empty() {
        return Vec::new();
    }

    let recipients: HashSet<&str> = outstanding.iter().map(|(_, a)| a.as_str()).collect();

    let mut paired: HashSet<Uuid> = HashSet::new();
    let mut pairs = Vec::new();

    for message in inbound {
        let from = normalize_address(&message.from_address);

        let matched: HashSet<&str> = recipients
            .iter()
            .copied()
            .filter(|addr| from.contains(*addr))
            .collect();

        if matched.is_empty() {
            continue;
        }

        for (entry, addr) in &outstanding {
            if matched.contains(addr.as_str()) && paired.insert(entry.tracking_id) {
                pairs.push(((*entry).clone(), message.clone()));
            }
        }
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SendStatus;
    use chrono::Utc;

    fn inbound(from: &str) -> InboundMessage {
        InboundMessage {
            from_address: from.to_string(),
            subject: "Re: hello".to_string(),
            received_at: Utc::now(),
            snippet: "sounds good".to_string(),
        }
    }

    #[test]
    fn test_display_name_wrapped_sender_matches() {
        let entries = vec![TrackingEntry::new("alice@co.com", "Hi", "Body")];
        let pairs = correlate(&entries, &[inbound("\"Alice\" <alice@co.com>")]);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0.tracking_id, entries[0].tracking_id);
    }

    #[test]
    fn test_other_sender_does_not_match() {
        let entries = vec![TrackingEntry::new("alice@co.com", "Hi", "Body")];
        assert!(correlate(&entries, &[inbound("bob@co.com")]).is_empty());
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        let entries = vec![TrackingEntry::new("alice@co.com", "Hi", "Body")];
        let pairs = correlate(&entries, &[inbound("  ALICE@CO.COM ")]);
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_replied_entries_are_excluded() {
        let mut entry = TrackingEntry::new("alice@co.com", "Hi", "Body");
        entry.mark_replied(Utc::now());
        assert_eq!(entry.status, SendStatus::Replied);
        assert!(correlate(&[entry], &[inbound("alice@co.com")]).is_empty());
    }

    #[test]
    fn test_multi_send_all_entries_paired() {
        let first = TrackingEntry::new("alice@co.com", "Hi", "Body");
        let second = TrackingEntry::new("alice@co.com", "Follow up", "Body");
        let other = TrackingEntry::new("carol@co.com", "Hi", "Body");
        let entries = vec![first.clone(), other, second.clone()];

        let pairs = correlate(&entries, &[inbound("alice@co.com")]);

        let ids: Vec<Uuid> = pairs.iter().map(|(e, _)| e.tracking_id).collect();
        assert_eq!(ids, vec![first.tracking_id, second.tracking_id]);
    }

    #[test]
    fn test_entry_paired_once_across_messages() {
        let entries = vec![TrackingEntry::new("alice@co.com", "Hi", "Body")];
        let messages = vec![inbound("alice@co.com"), inbound("Alice <alice@co.com>")];

        let pairs = correlate(&entries, &messages);

        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1.from_address, "alice@co.com");
    }

    #[test]
    fn test_substring_false_positive_is_accepted() {
        let entries = vec![TrackingEntry::new("al@co.com", "Hi", "Body")];
        let pairs = correlate(&entries, &[inbound("sal@co.com")]);
        assert_eq!(pairs.len(), 1);
    }

    #[test]
    fn test_empty_inputs() {
        let entries = vec![TrackingEntry::new("alice@co.com", "Hi", "Body")];
        assert!(correlate(&entries, &[]).is_empty());
        assert!(correlate(&[], &[inbound("alice@co.com")]).is_empty());
    }

    #[test]
    fn test_empty_recipient_never_matches() {
        let mut entry = TrackingEntry::new("x@y.com", "Hi", "Body");
        entry.recipient = "   ".to_string();
        assert!(correlate(&[entry], &[inbound("anyone@co.com")]).is_empty());
    }
}
