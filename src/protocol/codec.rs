//! Frame (de)serialization
//!
//! Decoding is strict about structure but never fatal: callers receive
//! `Error::Parse` and are expected to drop the frame and carry on.

use serde_json::Value;

use super::Frame;
use crate::error::{Error, Result};

/// Serialize a frame, stamping `timestamp` with `now` if it is missing
pub fn encode(frame: &Frame, now: u64) -> Result<String> {
    if frame.timestamp.is_some() {
        return Ok(serde_json::to_string(frame)?);
    }
    let mut stamped = frame.clone();
    stamped.stamp(now);
    Ok(serde_json::to_string(&stamped)?)
}

/// Parse a text frame received at `now`
pub fn decode(text: &str, now: u64) -> Result<Frame> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| Error::parse(format!("invalid JSON: {}", e)))?;

    match value.get("kind") {
        Some(Value::String(kind)) if !kind.is_empty() => {}
        Some(Value::String(_)) => return Err(Error::parse("empty 'kind'")),
        Some(_) => return Err(Error::parse("'kind' must be a string")),
        None if value.is_object() => return Err(Error::parse("missing 'kind'")),
        None => return Err(Error::parse("frame must be a JSON object")),
    }

    let mut frame: Frame =
        serde_json::from_value(value).map_err(|e| Error::parse(e.to_string()))?;
    frame.stamp(now);
    Ok(frame)
}

/// Parse a binary frame; the payload must be UTF-8 JSON
pub fn decode_bytes(bytes: &[u8], now: u64) -> Result<Frame> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::parse(format!("binary frame is not UTF-8: {}", e)))?;
    decode(text, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_stamps_missing_timestamp() {
        let text = encode(&Frame::new("alerts"), 4242).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["timestamp"], 4242);
    }

    #[test]
    fn test_encode_keeps_caller_timestamp() {
        let text = encode(&Frame::new("alerts").with_timestamp(7), 4242).unwrap();
        assert!(text.contains("\"timestamp\":7"));
    }

    #[test]
    fn test_decode_full_frame() {
        let frame = decode(
            r#"{"kind":"workflow:9","data":{"status":"APPROVED"},"timestamp":12,"userId":"u1"}"#,
            99,
        )
        .unwrap();
        assert_eq!(frame.kind, "workflow:9");
        assert_eq!(frame.data, Some(json!({"status": "APPROVED"})));
        assert_eq!(frame.timestamp, Some(12));
        assert_eq!(frame.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_decode_fills_receive_time() {
        let frame = decode(r#"{"kind":"pong"}"#, 1120).unwrap();
        assert_eq!(frame.timestamp, Some(1120));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for bad in ["not json", "[1,2]", r#"{"data":1}"#, r#"{"kind":""}"#, r#"{"kind":5}"#, "42"] {
            let err = decode(bad, 0).unwrap_err();
            assert!(matches!(err, Error::Parse { .. }), "{} should be a parse error", bad);
        }
    }

    #[test]
    fn test_decode_rejects_bad_timestamp_type() {
        let err = decode(r#"{"kind":"alerts","timestamp":"soon"}"#, 0).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn test_decode_bytes_requires_utf8() {
        assert!(decode_bytes(br#"{"kind":"alerts"}"#, 0).is_ok());
        assert!(matches!(decode_bytes(&[0xff, 0xfe], 0), Err(Error::Parse { .. })));
    }
}
