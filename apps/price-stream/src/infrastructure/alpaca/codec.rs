//! Stream Codec
//!
//! Decodes Alpaca stock-stream text frames. Alpaca batches messages into a
//! JSON array; each element is classified by its `T` field.
//!
//! Decoding is per element: an unrecognized type or an element that fails to
//! deserialize is reported in [`Decoded::dropped`] and the rest of the batch
//! is still returned. Only a frame that is not JSON at all is an error.

use serde::de::DeserializeOwned;

use crate::infrastructure::alpaca::messages::{
    AlpacaMessage, ErrorMessage, StockQuoteMessage, StockTradeMessage, SubscriptionMessage,
    SuccessMessage,
};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but neither an array nor an object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Why a single element of a frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// `T` names a message type this client does not handle.
    UnknownType,
    /// Element has no `T` field.
    MissingType,
    /// Element has a known `T` but the wrong shape.
    Malformed,
}

impl DropReason {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UnknownType => "unknown_type",
            Self::MissingType => "missing_type",
            Self::Malformed => "malformed",
        }
    }
}

/// A dropped element with a short description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedElement {
    /// Drop classification.
    pub reason: DropReason,
    /// The `T` value or the deserialization error.
    pub detail: String,
}

/// Result of decoding one frame.
#[derive(Debug, Default)]
pub struct Decoded {
    /// Messages in frame order.
    pub messages: Vec<AlpacaMessage>,
    /// Elements that were skipped.
    pub dropped: Vec<DroppedElement>,
}

/// JSON codec for the stock stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON or is a JSON scalar.
    pub fn decode(&self, text: &str) -> Result<Decoded, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;
        let elements = match value {
            serde_json::Value::Array(items) => items,
            object @ serde_json::Value::Object(_) => vec![object],
            other => {
                let snippet: String = other.to_string().chars().take(50).collect();
                return Err(CodecError::InvalidFormat(format!(
                    "expected JSON array or object, got: {snippet}"
                )));
            }
        };

        let mut decoded = Decoded {
            messages: Vec::with_capacity(elements.len()),
            dropped: Vec::new(),
        };
        for element in elements {
            match Self::decode_element(element) {
                Ok(message) => decoded.messages.push(message),
                Err(dropped) => decoded.dropped.push(dropped),
            }
        }
        Ok(decoded)
    }

    fn decode_element(value: serde_json::Value) -> Result<AlpacaMessage, DroppedElement> {
        let Some(msg_type) = value.get("T").and_then(|v| v.as_str()).map(str::to_owned) else {
            return Err(DroppedElement {
                reason: DropReason::MissingType,
                detail: "no T field".to_string(),
            });
        };

        match msg_type.as_str() {
            "success" => parse::<SuccessMessage>(value).map(AlpacaMessage::Success),
            "error" => parse::<ErrorMessage>(value).map(AlpacaMessage::Error),
            "subscription" => parse::<SubscriptionMessage>(value).map(AlpacaMessage::Subscription),
            "q" => parse::<StockQuoteMessage>(value).map(AlpacaMessage::Quote),
            "t" => parse::<StockTradeMessage>(value).map(AlpacaMessage::Trade),
            _ => Err(DroppedElement {
                reason: DropReason::UnknownType,
                detail: msg_type,
            }),
        }
    }

    /// Encode a value to JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }
}

fn parse<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, DroppedElement> {
    serde_json::from_value::<T>(value).map_err(|e| DroppedElement {
        reason: DropReason::Malformed,
        detail: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::alpaca::messages::SuccessKind;
    use test_case::test_case;

    #[test]
    fn decodes_mixed_batch() {
        let codec = JsonCodec::new();
        let frame = r#"[
            {"T":"success","msg":"authenticated"},
            {"T":"q","S":"AAPL","bp":150.0,"ap":150.1},
            {"T":"t","S":"MSFT","p":410.5,"s":10}
        ]"#;
        let decoded = codec.decode(frame).unwrap();
        assert!(decoded.dropped.is_empty());
        assert_eq!(decoded.messages.len(), 3);
        assert!(matches!(
            &decoded.messages[0],
            AlpacaMessage::Success(SuccessMessage { msg: SuccessKind::Authenticated })
        ));
        assert!(matches!(&decoded.messages[1], AlpacaMessage::Quote(q) if q.symbol == "AAPL"));
        assert!(matches!(&decoded.messages[2], AlpacaMessage::Trade(t) if t.symbol == "MSFT"));
    }

    #[test]
    fn single_object_frame() {
        let decoded = JsonCodec::new()
            .decode(r#"{"T":"error","code":406,"msg":"connection limit exceeded"}"#)
            .unwrap();
        assert!(matches!(&decoded.messages[0], AlpacaMessage::Error(e) if e.code == 406));
    }

    #[test]
    fn unknown_and_bad_elements_are_skipped() {
        let frame = r#"[
            {"T":"b","S":"SPY","o":1.0},
            {"T":"q","S":"AAPL","ap":"not-a-number"},
            {"S":"AAPL"},
            {"T":"t","S":"AAPL","p":101.0}
        ]"#;
        let decoded = JsonCodec::new().decode(frame).unwrap();
        assert_eq!(decoded.messages.len(), 1);
        let reasons: Vec<_> = decoded.dropped.iter().map(|d| d.reason).collect();
        assert_eq!(
            reasons,
            vec![
                DropReason::UnknownType,
                DropReason::Malformed,
                DropReason::MissingType
            ]
        );
    }

    #[test]
    fn empty_array_is_empty_batch() {
        let decoded = JsonCodec::new().decode("[]").unwrap();
        assert!(decoded.messages.is_empty());
        assert!(decoded.dropped.is_empty());
    }

    #[test_case("not json" ; "garbage")]
    #[test_case("[{\"T\":\"q\"" ; "truncated")]
    #[test_case("42" ; "scalar")]
    fn malformed_frames_are_errors(frame: &str) {
        assert!(JsonCodec::new().decode(frame).is_err());
    }

    #[test]
    fn drop_reason_labels() {
        assert_eq!(DropReason::UnknownType.as_str(), "unknown_type");
        assert_eq!(DropReason::Malformed.as_str(), "malformed");
    }
}
