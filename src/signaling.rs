//! Signaling frame schema relayed between a broadcaster and its viewers.
//!
//! Fields mirror the wire format carried by the browser-side peer
//! connection negotiation: `sdp` and `candidate` are passed through as
//! opaque JSON, never interpreted here. Unknown fields are preserved via
//! `extra` so a relayed frame round-trips byte-for-byte apart from the
//! `viewerId` mutation the router applies.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const OFFER: &str = "offer";
pub const ANSWER: &str = "answer";
pub const ICE_CANDIDATE: &str = "ice-candidate";
pub const VIEWER_JOINED: &str = "viewer-joined";
pub const VIEWER_LEFT: &str = "viewer-left";
pub const BROADCASTER_LEFT: &str = "broadcaster-left";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "streamId", skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(rename = "viewerId", skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<String>,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
    #[serde(rename = "createdAt", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Anything the schema above doesn't name, preserved for round-tripping.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SignalingFrame {
    pub fn viewer_joined(viewer_id: impl Into<String>) -> Self {
        Self::notice(VIEWER_JOINED, viewer_id.into())
    }

    pub fn viewer_left(viewer_id: impl Into<String>) -> Self {
        Self::notice(VIEWER_LEFT, viewer_id.into())
    }

    pub fn broadcaster_left() -> Self {
        Self {
            kind: BROADCASTER_LEFT.to_string(),
            stream_id: None,
            viewer_id: None,
            user_id: None,
            username: None,
            avatar: None,
            content: None,
            sdp: None,
            candidate: None,
            created_at: None,
            extra: Map::new(),
        }
    }

    fn notice(kind: &str, viewer_id: String) -> Self {
        Self {
            kind: kind.to_string(),
            stream_id: None,
            viewer_id: Some(viewer_id),
            user_id: None,
            username: None,
            avatar: None,
            content: None,
            sdp: None,
            candidate: None,
            created_at: None,
            extra: Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_round_trip() {
        let raw = r#"{"type":"offer","viewerId":"v1","sdp":{"x":1},"extraField":"kept"}"#;
        let frame: SignalingFrame = serde_json::from_str(raw).unwrap();
        assert_eq!(frame.extra.get("extraField").unwrap(), "kept");

        let encoded = serde_json::to_string(&frame).unwrap();
        let reparsed: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(reparsed["extraField"], "kept");
        assert_eq!(reparsed["viewerId"], "v1");
        assert_eq!(reparsed["sdp"]["x"], 1);
    }

    #[test]
    fn omitted_optional_fields_are_absent_on_write() {
        let frame = SignalingFrame::viewer_joined("v1");
        let encoded = serde_json::to_string(&frame).unwrap();
        assert!(!encoded.contains("sdp"));
        assert!(!encoded.contains("candidate"));
    }
}
