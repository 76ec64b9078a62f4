//! Inbound message shape delivered by a WhatsApp client backend.

use serde::{Deserialize, Serialize};

/// Media attachment carried by a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaPayload {
    pub mimetype: String,
    #[serde(with = "serde_bytes_base64")]
    pub bytes: Vec<u8>,
}

/// A message as delivered by the external client, reduced to the fields
/// the router consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Canonical message id, used for intra-process dedupe.
    pub id: String,
    /// Chat identifier; individual chats end in `@c.us`.
    pub chat_id: String,
    /// Sender identifier (same shape as `chat_id` for individuals).
    pub from: String,
    #[serde(default)]
    pub body: String,
    /// Unix epoch seconds as reported by the client.
    pub timestamp: i64,
    #[serde(default)]
    pub from_me: bool,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub media: Option<MediaPayload>,
}

impl InboundMessage {
    /// True for messages from an individual chat (not groups, broadcast
    /// lists or status updates).
    pub fn is_individual(&self) -> bool {
        self.chat_id.ends_with("@c.us")
    }
}

/// Media bytes travel as base64 when messages are simulated over HTTP
/// (`/dev/incoming`); in-process delivery keeps them as raw bytes.
mod serde_bytes_base64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn individual_chat_detection() {
        let mut msg = InboundMessage {
            id: "m1".into(),
            chat_id: "549115550001@c.us".into(),
            from: "549115550001@c.us".into(),
            body: String::new(),
            timestamp: 0,
            from_me: false,
            sender_name: None,
            avatar_url: None,
            media: None,
        };
        assert!(msg.is_individual());

        msg.chat_id = "1203630xxxx@g.us".into();
        assert!(!msg.is_individual());
    }

    #[test]
    fn media_round_trips_as_base64() {
        let msg = InboundMessage {
            id: "m2".into(),
            chat_id: "549115550001@c.us".into(),
            from: "549115550001@c.us".into(),
            body: "comprobante".into(),
            timestamp: 1,
            from_me: false,
            sender_name: None,
            avatar_url: None,
            media: Some(MediaPayload {
                mimetype: "image/png".into(),
                bytes: vec![1, 2, 3, 4],
            }),
        };
        let json = serde_json::to_string(&msg).unwrap();
        let back: InboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.media.unwrap().bytes, vec![1, 2, 3, 4]);
    }
}
