//! Payload encoding inside the AEAD.
//!
//! A payload is either plain UTF-8 text or, when the message replies to an
//! earlier transaction, a JSON object `{"replyTo":{"preview":..,"txid":..},
//! "text":..}` with sorted keys. The reserved marker `{"type":"key-publish"}`
//! signals an envelope that carries no user message; disambiguation is
//! payload-level by design — the chain sees no difference, only the
//! decrypting endpoint does.

use serde_json::{json, Value};

use crate::error::ChatError;

/// Maximum reply-preview length. Truncation replaces the tail with `...` so
/// the result is exactly this long.
pub const PREVIEW_MAX_CHARS: usize = 80;

pub const KEY_PUBLISH_TYPE: &str = "key-publish";

/// Reply context supplied by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyContext {
    pub txid: String,
    pub preview: String,
}

/// Decoded payload plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedPayload {
    Text {
        text: String,
        reply_to_id: Option<String>,
        reply_to_preview: Option<String>,
    },
    /// Reserved key-publish marker; filtered out of user-visible streams.
    KeyPublish,
}

/// Truncate a preview to [`PREVIEW_MAX_CHARS`] characters, ending in `...`
/// iff truncation occurred.
pub fn truncate_preview(preview: &str) -> String {
    if preview.chars().count() <= PREVIEW_MAX_CHARS {
        return preview.to_string();
    }
    let head: String = preview.chars().take(PREVIEW_MAX_CHARS - 3).collect();
    format!("{head}...")
}

/// The canonical key-publish payload bytes.
pub fn key_publish_payload() -> Vec<u8> {
    // serde_json maps are BTreeMap-backed, so keys come out sorted.
    json!({ "type": KEY_PUBLISH_TYPE }).to_string().into_bytes()
}

/// Encode `text` (plus optional reply context) for sealing.
pub fn encode(text: &str, reply_to: Option<&ReplyContext>) -> Vec<u8> {
    match reply_to {
        None => text.as_bytes().to_vec(),
        Some(reply) => json!({
            "text": text,
            "replyTo": {
                "txid": reply.txid,
                "preview": truncate_preview(&reply.preview),
            },
        })
        .to_string()
        .into_bytes(),
    }
}

/// Decode decrypted payload bytes.
///
/// Recognition order: canonical key-publish JSON, then structured payload
/// (leading `{` that parses with a string `text`), then plain UTF-8.
pub fn decode(bytes: &[u8]) -> Result<DecodedPayload, ChatError> {
    if bytes.first() == Some(&b'{') {
        if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
            if value.get("type").and_then(Value::as_str) == Some(KEY_PUBLISH_TYPE) {
                return Ok(DecodedPayload::KeyPublish);
            }
            if let Some(text) = value.get("text").and_then(Value::as_str) {
                let reply = value.get("replyTo");
                return Ok(DecodedPayload::Text {
                    text: text.to_string(),
                    reply_to_id: reply
                        .and_then(|r| r.get("txid"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    reply_to_preview: reply
                        .and_then(|r| r.get("preview"))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
        }
        // Leading brace but not our structure: fall through to plain text.
    }
    let text = String::from_utf8(bytes.to_vec())
        .map_err(|_| ChatError::DecryptionFailed("payload is not valid UTF-8".into()))?;
    Ok(DecodedPayload::Text { text, reply_to_id: None, reply_to_preview: None })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_roundtrip() {
        let encoded = encode("Hello, Algorand!", None);
        assert_eq!(encoded, b"Hello, Algorand!");
        match decode(&encoded).unwrap() {
            DecodedPayload::Text { text, reply_to_id, reply_to_preview } => {
                assert_eq!(text, "Hello, Algorand!");
                assert!(reply_to_id.is_none());
                assert!(reply_to_preview.is_none());
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn reply_roundtrip_with_truncation() {
        let reply = ReplyContext { txid: "TX123".into(), preview: "A".repeat(120) };
        let encoded = encode("pong", Some(&reply));
        // Sorted keys: replyTo before text.
        let as_str = std::str::from_utf8(&encoded).unwrap();
        assert!(as_str.starts_with("{\"replyTo\""));

        match decode(&encoded).unwrap() {
            DecodedPayload::Text { text, reply_to_id, reply_to_preview } => {
                assert_eq!(text, "pong");
                assert_eq!(reply_to_id.as_deref(), Some("TX123"));
                let preview = reply_to_preview.unwrap();
                assert_eq!(preview.chars().count(), 80);
                assert_eq!(preview, format!("{}...", "A".repeat(77)));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn short_preview_untouched() {
        assert_eq!(truncate_preview("short"), "short");
        let exactly_80 = "B".repeat(80);
        assert_eq!(truncate_preview(&exactly_80), exactly_80);
    }

    #[test]
    fn key_publish_detected() {
        let encoded = key_publish_payload();
        assert_eq!(encoded, b"{\"type\":\"key-publish\"}");
        assert_eq!(decode(&encoded).unwrap(), DecodedPayload::KeyPublish);
    }

    #[test]
    fn brace_but_not_structured_is_plain_text() {
        let bytes = b"{not json at all";
        match decode(bytes).unwrap() {
            DecodedPayload::Text { text, .. } => assert_eq!(text, "{not json at all"),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert!(decode(&[0xff, 0xfe, 0xfd]).is_err());
    }
}
