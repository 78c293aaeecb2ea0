//! Serde helpers for binary buffers inside JSON envelopes.
//!
//! Buffers are written as base64 strings. On the way in both base64 strings
//! and plain byte arrays (`[1, 2, 3]`, as some frontends send them) are
//! accepted, and a `null` or missing list decodes to no buffers.

use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Encode one buffer as standard base64.
pub fn encode_buffer(buffer: &[u8]) -> String {
    BASE64_STANDARD.encode(buffer)
}

/// Decode one standard base64 buffer.
pub fn decode_buffer(encoded: &str) -> Result<Bytes, base64::DecodeError> {
    BASE64_STANDARD.decode(encoded).map(Bytes::from)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EncodedBuffer {
    Base64(String),
    Raw(Vec<u8>),
}

/// `#[serde(with = "widget_wire::codec::buffers")]` for `Vec<Bytes>` fields.
pub mod buffers {
    use super::*;

    pub fn serialize<S>(data: &[Bytes], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        data.iter()
            .map(|bytes| encode_buffer(bytes))
            .collect::<Vec<_>>()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Bytes>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<Vec<EncodedBuffer>> = Option::deserialize(deserializer)?;
        encoded
            .unwrap_or_default()
            .into_iter()
            .map(|buffer| match buffer {
                EncodedBuffer::Base64(s) => decode_buffer(&s).map_err(serde::de::Error::custom),
                EncodedBuffer::Raw(raw) => Ok(Bytes::from(raw)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, Deserialize)]
    struct Envelope {
        #[serde(default, with = "buffers")]
        buffers: Vec<Bytes>,
    }

    #[test]
    fn test_buffers_encode_as_base64() {
        let envelope = Envelope {
            buffers: vec![Bytes::from_static(b"hello"), Bytes::from_static(b"world")],
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(json, r#"{"buffers":["aGVsbG8=","d29ybGQ="]}"#);
    }

    #[test]
    fn test_byte_arrays_are_accepted() {
        let envelope: Envelope =
            serde_json::from_str(r#"{"buffers": [[1, 2, 3], "aGk="]}"#).unwrap();
        assert_eq!(&envelope.buffers[0][..], &[1, 2, 3]);
        assert_eq!(&envelope.buffers[1][..], b"hi");
    }

    #[test]
    fn test_null_and_missing_buffers_are_empty() {
        let envelope: Envelope = serde_json::from_str(r#"{"buffers": null}"#).unwrap();
        assert!(envelope.buffers.is_empty());
        let envelope: Envelope = serde_json::from_str("{}").unwrap();
        assert!(envelope.buffers.is_empty());
    }

    #[test]
    fn test_invalid_base64_is_rejected() {
        let result: Result<Envelope, _> = serde_json::from_str(r#"{"buffers": ["not base64!"]}"#);
        assert!(result.is_err());
    }
}
