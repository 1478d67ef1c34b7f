use chrono::DateTime;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Payload delivered by the push channel, in its wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "Sender__c", default)]
    pub sender: String,
    #[serde(rename = "Message__c", default)]
    pub message: String,
    #[serde(
        rename = "TimeStamp__c",
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp_millis: Option<i64>,
}

impl RawEvent {
    pub fn new(sender: impl Into<String>, message: impl Into<String>, timestamp_millis: i64) -> Self {
        Self {
            sender: sender.into(),
            message: message.into(),
            timestamp_millis: Some(timestamp_millis),
        }
    }
}

/// Accepts numbers, numeric strings and RFC 3339 strings; anything else
/// becomes `None` instead of failing the whole payload.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>().ok().or_else(|| {
                DateTime::parse_from_rfc3339(text)
                    .ok()
                    .map(|parsed| parsed.timestamp_millis())
            })
        }
        _ => None,
    })
}

/// Which side of the conversation a message is rendered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Alignment {
    /// Authored by the local session.
    #[serde(rename = "self")]
    SelfAuthored,
    #[serde(rename = "other")]
    Other,
}

/// Canonical chat entry. Built once by the normalizer and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    sender: String,
    text: String,
    display_time: String,
    alignment: Alignment,
}

impl ChatMessage {
    pub(crate) fn new(
        sender: String,
        text: String,
        display_time: String,
        alignment: Alignment,
    ) -> Self {
        Self {
            sender,
            text,
            display_time,
            alignment,
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Render-ready markup fragment.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn display_time(&self) -> &str {
        &self.display_time
    }

    pub fn alignment(&self) -> Alignment {
        self.alignment
    }
}

/// Body of an outbound send call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub sender: String,
    pub message: String,
}
