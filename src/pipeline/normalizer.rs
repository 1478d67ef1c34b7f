use chrono::{DateTime, Local, TimeZone};

use crate::common::{Alignment, ChatMessage, RawEvent};

use super::sanitizer::sanitize;

/// Rendered in place of a timestamp that is missing or out of range.
pub const INVALID_TIME: &str = "Invalid Date";

/// Whether inbound text goes through the sanitizer before it is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundPolicy {
    Sanitize,
    Trust,
}

impl InboundPolicy {
    pub fn from_flag(sanitize_inbound: bool) -> Self {
        if sanitize_inbound {
            Self::Sanitize
        } else {
            Self::Trust
        }
    }
}

/// Turns a transport payload into a canonical message. Never fails: bad
/// fields degrade to defaults so one event cannot stall the stream.
pub fn normalize(raw: RawEvent, self_id: &str, policy: InboundPolicy) -> ChatMessage {
    normalize_in(raw, self_id, policy, &Local)
}

/// Same as [`normalize`] with an explicit timezone for the display time.
pub fn normalize_in<Tz>(raw: RawEvent, self_id: &str, policy: InboundPolicy, tz: &Tz) -> ChatMessage
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let display_time = raw
        .timestamp_millis
        .map_or_else(|| INVALID_TIME.to_string(), |millis| format_time(millis, tz));

    let alignment = if raw.sender == self_id {
        Alignment::SelfAuthored
    } else {
        Alignment::Other
    };

    let text = match policy {
        InboundPolicy::Sanitize => sanitize(&raw.message),
        InboundPolicy::Trust => raw.message,
    };

    ChatMessage::new(raw.sender, text, display_time, alignment)
}

fn format_time<Tz>(millis: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    match DateTime::from_timestamp_millis(millis) {
        Some(utc) => utc.with_timezone(tz).format("%H:%M").to_string(),
        None => {
            log::debug!("Timestamp {millis} is out of range");
            INVALID_TIME.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, Utc};

    use super::*;

    #[test]
    fn alignment_follows_session_identity() {
        let raw = RawEvent::new("A", "hi", 0);
        assert_eq!(
            normalize(raw.clone(), "A", InboundPolicy::Sanitize).alignment(),
            Alignment::SelfAuthored
        );
        assert_eq!(
            normalize(raw, "B", InboundPolicy::Sanitize).alignment(),
            Alignment::Other
        );
    }

    #[test]
    fn display_time_is_hour_and_minute() {
        let raw = RawEvent::new("U1", "hi", 1_700_000_000_000);
        let utc = normalize_in(raw.clone(), "me", InboundPolicy::Sanitize, &Utc);
        assert_eq!(utc.display_time(), "22:13");

        let plus_two = FixedOffset::east_opt(2 * 3600).unwrap();
        let shifted = normalize_in(raw, "me", InboundPolicy::Sanitize, &plus_two);
        assert_eq!(shifted.display_time(), "00:13");
    }

    #[test]
    fn missing_or_absurd_timestamp_fails_soft() {
        let missing = RawEvent {
            sender: "U1".into(),
            message: "hi".into(),
            timestamp_millis: None,
        };
        let message = normalize(missing, "me", InboundPolicy::Sanitize);
        assert_eq!(message.display_time(), INVALID_TIME);
        assert_eq!(message.text(), "hi");

        let absurd = RawEvent::new("U1", "hi", i64::MAX);
        assert_eq!(
            normalize(absurd, "me", InboundPolicy::Sanitize).display_time(),
            INVALID_TIME
        );
    }

    #[test]
    fn sanitize_policy_filters_inbound_text() {
        let raw = RawEvent::new("U1", "<b>hi</b><script>x</script>", 0);
        let message = normalize(raw, "me", InboundPolicy::Sanitize);
        assert_eq!(message.text(), "<b>hi</b>x");
    }

    #[test]
    fn trust_policy_keeps_inbound_text_verbatim() {
        let raw = RawEvent::new("U1", "<b>hi</b><script>x</script>", 0);
        let message = normalize(raw, "me", InboundPolicy::Trust);
        assert_eq!(message.text(), "<b>hi</b><script>x</script>");
    }
}
