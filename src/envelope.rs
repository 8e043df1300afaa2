//! Wire format for settlement messages.
//!
//! Every settlement crosses the channel as a MessagePack-encoded
//! [`Envelope`] keyed by its ticket. Field names are encoded so optional
//! fields can be skipped when absent.

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;

use crate::error::EnvelopeDecodeSnafu;
use crate::error::EnvelopeEncodeSnafu;
use crate::error::Result;

/// Wire record published for one settlement.
///
/// Exactly one of `error` and `value` is set by producers. A message
/// carrying both is treated as a rejection by receivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Ticket the settlement belongs to.
    pub ticket: String,
    /// Rejection reason, present only on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Marshalled value, present only on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Vec<u8>>,
}

impl Envelope {
    /// Envelope for a resolved ticket carrying the marshalled value.
    pub fn resolved(ticket: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            ticket: ticket.into(),
            error: None,
            value: Some(value),
        }
    }

    /// Envelope for a rejected ticket carrying the producer's reason.
    pub fn rejected(ticket: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            ticket: ticket.into(),
            error: Some(reason.into()),
            value: None,
        }
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).context(EnvelopeEncodeSnafu {
            ticket: self.ticket.as_str(),
        })
    }

    /// Decode from wire bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(bytes).context(EnvelopeDecodeSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeferredError;

    #[test]
    fn test_resolved_envelope_roundtrip() {
        let envelope = Envelope::resolved("ticket-1", b"payload".to_vec());

        let bytes = envelope.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.value.as_deref(), Some(b"payload".as_slice()));
        assert!(decoded.error.is_none());
    }

    #[test]
    fn test_rejected_envelope_roundtrip() {
        let envelope = Envelope::rejected("ticket-2", "downstream failure");

        let bytes = envelope.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();

        assert_eq!(decoded, envelope);
        assert_eq!(decoded.error.as_deref(), Some("downstream failure"));
        assert!(decoded.value.is_none());
    }

    #[test]
    fn test_envelope_with_both_fields_roundtrips() {
        let envelope = Envelope {
            ticket: "ticket-3".to_string(),
            error: Some("conflict".to_string()),
            value: Some(b"ignored".to_vec()),
        };

        let bytes = envelope.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();

        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result = Envelope::decode(&[0xff, 0xff, 0xff]);
        assert!(matches!(result, Err(DeferredError::EnvelopeDecode { .. })));
    }
}
