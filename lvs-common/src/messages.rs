//! Wire messages exchanged on the streaming endpoint
//!
//! Inbound traffic is parsed into the closed [`InboundMessage`] union; anything
//! that does not fit is dropped by the caller without closing the connection.
//! Outbound traffic is a single [`VerificationUpdate`] broadcast to every
//! observer of a meeting.

use serde::{Deserialize, Serialize};

/// Message received from a streaming client
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Keep-alive, ignored
    Ping,
    /// Base64 image payload, optionally prefixed with a data URL header
    Frame { payload: String },
}

/// Loose wire shape accepted from clients.
///
/// Clients send `{"type": "ping"}`, `{"type": "frame", "image": "..."}` or the
/// untyped `{"image": "..."}` / `{"frame": "..."}`.
#[derive(Debug, Deserialize)]
struct WireInbound {
    #[serde(rename = "type")]
    kind: Option<String>,
    image: Option<String>,
    frame: Option<String>,
}

impl InboundMessage {
    /// Parse a text message; None for unrecognized payloads
    pub fn parse(text: &str) -> Option<Self> {
        let wire: WireInbound = serde_json::from_str(text).ok()?;

        match wire.kind.as_deref() {
            Some("ping") => return Some(InboundMessage::Ping),
            Some("frame") | None => {}
            Some(_) => return None,
        }

        wire.image
            .or(wire.frame)
            .filter(|payload| !payload.is_empty())
            .map(|payload| InboundMessage::Frame { payload })
    }
}

/// Liveness section of an outbound update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LivenessStatus {
    pub confirmed: bool,
    pub score: f64,
    pub available: bool,
}

/// Deepfake section of an outbound update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeepfakeStatus {
    pub is_deepfake: bool,
    pub score: f64,
    pub available: bool,
}

/// Face-match section of an outbound update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceMatchStatus {
    pub distance: f64,
    pub is_match: bool,
    pub available: bool,
}

/// Verification status broadcast to all observers of a meeting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationUpdate {
    pub liveness: LivenessStatus,
    pub deepfake: DeepfakeStatus,
    pub face_match: FaceMatchStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ping() {
        assert_eq!(
            InboundMessage::parse(r#"{"type":"ping"}"#),
            Some(InboundMessage::Ping)
        );
    }

    #[test]
    fn test_parse_frame_variants() {
        let tagged = InboundMessage::parse(r#"{"type":"frame","image":"abc"}"#);
        let untagged_image = InboundMessage::parse(r#"{"image":"abc"}"#);
        let untagged_frame = InboundMessage::parse(r#"{"frame":"abc"}"#);

        let expected = Some(InboundMessage::Frame {
            payload: "abc".to_string(),
        });
        assert_eq!(tagged, expected);
        assert_eq!(untagged_image, expected);
        assert_eq!(untagged_frame, expected);
    }

    #[test]
    fn test_parse_rejects_unrecognized() {
        assert_eq!(InboundMessage::parse("not json"), None);
        assert_eq!(InboundMessage::parse(r#"{"type":"subscribe"}"#), None);
        assert_eq!(InboundMessage::parse(r#"{"image":""}"#), None);
        assert_eq!(InboundMessage::parse(r#"{}"#), None);
        assert_eq!(InboundMessage::parse(r#"[1,2,3]"#), None);
    }

    #[test]
    fn test_update_wire_shape() {
        let update = VerificationUpdate {
            liveness: LivenessStatus {
                confirmed: true,
                score: 1.0,
                available: true,
            },
            deepfake: DeepfakeStatus {
                is_deepfake: false,
                score: 0.02,
                available: true,
            },
            face_match: FaceMatchStatus {
                distance: 0.1,
                is_match: true,
                available: true,
            },
        };

        let value = serde_json::to_value(update).unwrap();
        assert_eq!(
            value,
            json!({
                "liveness": {"confirmed": true, "score": 1.0, "available": true},
                "deepfake": {"isDeepfake": false, "score": 0.02, "available": true},
                "faceMatch": {"distance": 0.1, "isMatch": true, "available": true}
            })
        );
    }
}
