//! Wire protocol envelopes.
//!
//! After the key handshake every message on a channel is one [`Envelope`],
//! encoded as a MessagePack map with named fields:
//!
//! - request: `{ id, method, params }`
//! - success: `{ id, result }`
//! - failure: `{ id, error }`
//!
//! The variant is recognised by which fields are present, so a `result` of
//! `nil` is still a success. Params, results and error payloads are schema-less
//! MessagePack values, binary and extension types included. Framing is the
//! transport's job; an encoded envelope is exactly one channel message.

use rmpv::Value;
use serde::{Deserialize, Deserializer, Serialize};

/// Caller-chosen request identifier, echoed unchanged in the response.
pub type RequestId = u64;

/// Error code for a request whose envelope could not be decoded.
pub const BAD_REQUEST: i64 = 400;

/// Error code for a request naming a method the callee does not serve.
pub const METHOD_NOT_FOUND: i64 = 404;

/// Error code for a handler that ran and failed.
pub const HANDLER_FAILED: i64 = 500;

/// One RPC message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEnvelope", into = "RawEnvelope")]
pub enum Envelope {
    /// Invoke `method` on the remote side.
    Request {
        id: RequestId,
        method: String,
        params: Vec<Value>,
    },
    /// Successful completion of request `id`.
    Success { id: RequestId, result: Value },
    /// Failed completion of request `id`.
    Failure { id: RequestId, error: Value },
}

impl Envelope {
    /// Request id carried by any variant.
    pub fn id(&self) -> RequestId {
        match self {
            Envelope::Request { id, .. }
            | Envelope::Success { id, .. }
            | Envelope::Failure { id, .. } => *id,
        }
    }
}

/// Flat on-the-wire shape shared by all three variants.
#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    params: Option<Vec<Value>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    result: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    error: Option<Value>,
}

/// A field that is present maps to `Some`, even when its value is nil.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl TryFrom<RawEnvelope> for Envelope {
    type Error = String;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        if let Some(method) = raw.method {
            return Ok(Envelope::Request {
                id: raw.id,
                method,
                params: raw.params.unwrap_or_default(),
            });
        }
        if let Some(result) = raw.result {
            return Ok(Envelope::Success { id: raw.id, result });
        }
        if let Some(error) = raw.error {
            return Ok(Envelope::Failure { id: raw.id, error });
        }
        Err(format!(
            "envelope {} carries neither method, result nor error",
            raw.id
        ))
    }
}

impl From<Envelope> for RawEnvelope {
    fn from(envelope: Envelope) -> Self {
        let mut raw = RawEnvelope {
            id: envelope.id(),
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match envelope {
            Envelope::Request { method, params, .. } => {
                raw.method = Some(method);
                raw.params = Some(params);
            }
            Envelope::Success { result, .. } => raw.result = Some(result),
            Envelope::Failure { error, .. } => raw.error = Some(error),
        }
        raw
    }
}

/// What could be recovered from a message that failed to decode as an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub id: RequestId,
    /// The message named a `method`, so the sender is waiting for a reply.
    pub is_request: bool,
}

/// Read just the `id` (and whether a `method` key is present) from a message
/// that is a well-formed MessagePack map but not a valid envelope.
pub fn recover_header(bytes: &[u8]) -> Option<EnvelopeHeader> {
    let value: Value = rmp_serde::from_slice(bytes).ok()?;
    let id = map_field(&value, "id")?.as_u64()?;
    Some(EnvelopeHeader {
        id,
        is_request: map_field(&value, "method").is_some(),
    })
}

/// Look up a string key in a MessagePack map value.
pub fn map_field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value
        .as_map()?
        .iter()
        .find(|(k, _)| k.as_str() == Some(key))
        .map(|(_, v)| v)
}

/// Build the error payload carried by a failure envelope.
pub fn error_value(code: i64, message: impl Into<String>) -> Value {
    Value::Map(vec![
        (Value::from("code"), Value::from(code)),
        (Value::from("message"), Value::from(message.into())),
    ])
}

/// Encode an envelope as a MessagePack map.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(envelope)
}

/// Decode one envelope from a channel message.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}
