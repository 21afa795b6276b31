use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload of the `subscribe` and `unsubscribe` control events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRequest {
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Payload of the `send_message` control event
///
/// ```rust
/// use serde_json::json;
/// use tokio_pully::protocol::SendMessageRequest;
///
/// let request = SendMessageRequest {
///     channel_name: "room1".into(),
///     message: json!({"text": "hi"}),
///     event: None,
///     token: None,
/// };
/// assert_eq!(
///     serde_json::to_value(&request).unwrap(),
///     json!({"channelName": "room1", "message": {"text": "hi"}}),
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub channel_name: String,
    pub message: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Conventional shape of inbound channel messages
///
/// Listeners receive raw JSON. Servers usually deliver
/// `{"channel": ..., "data": ...}`, which this type reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Value,
}

impl InboundMessage {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
