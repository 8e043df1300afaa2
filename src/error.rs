//! Error types for deferred results.

use snafu::Snafu;

use crate::broker::BrokerError;
use crate::codec::CodecError;

/// Errors from deferred operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DeferredError {
    /// No waiter is registered for the ticket.
    #[snafu(display("no waiter registered for ticket '{ticket}'"))]
    TicketNotFound {
        /// The ticket that had no waiter.
        ticket: String,
    },

    /// The producer rejected the ticket.
    #[snafu(display("ticket '{ticket}' rejected: {reason}"))]
    Rejected {
        /// The rejected ticket.
        ticket: String,
        /// Reason supplied by the producer.
        reason: String,
    },

    /// A newer wait on the same ticket displaced this one.
    #[snafu(display("wait on ticket '{ticket}' displaced by a newer wait"))]
    Displaced {
        /// The displaced ticket.
        ticket: String,
    },

    /// The value could not be encoded for publishing.
    #[snafu(display("encode value for ticket '{ticket}': {source}"))]
    Encode {
        /// The ticket being resolved.
        ticket: String,
        /// The underlying codec error.
        source: CodecError,
    },

    /// The payload could not be decoded into the expected type.
    #[snafu(display("decode payload for ticket '{ticket}': {source}"))]
    Decode {
        /// The awaited ticket.
        ticket: String,
        /// The underlying codec error.
        source: CodecError,
    },

    /// The envelope could not be encoded for the wire.
    #[snafu(display("encode envelope for ticket '{ticket}': {source}"))]
    EnvelopeEncode {
        /// The ticket being settled.
        ticket: String,
        /// The underlying encoding error.
        source: rmp_serde::encode::Error,
    },

    /// Inbound bytes could not be decoded as an envelope.
    #[snafu(display("decode envelope: {source}"))]
    EnvelopeDecode {
        /// The underlying decoding error.
        source: rmp_serde::decode::Error,
    },

    /// Underlying broker transport error.
    #[snafu(display("broker error: {source}"))]
    Broker {
        /// The underlying error.
        source: BrokerError,
    },
}

impl From<BrokerError> for DeferredError {
    fn from(source: BrokerError) -> Self {
        DeferredError::Broker { source }
    }
}

/// Result alias for deferred operations.
pub type Result<T, E = DeferredError> = std::result::Result<T, E>;
