pub mod ack;
pub mod batch;
pub mod codec;

pub use ack::{AckMessage, AckStatus};
pub use batch::{BatchMessage, DType, Item, Payload, PayloadKind};

use serde::{Deserialize, Serialize};

/// Top-level wire envelope. Every frame decodes to exactly one of these,
/// discriminated by the `type` tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    Batch(BatchMessage),
    Ack(AckMessage),
}

// Wrapping helpers so call sites can stay free of the enum path. Producers
// build batches, receivers build acks; both just call `.into()`.
impl Envelope {
    /// Wraps a BatchMessage into a top-level Envelope.
    #[inline]
    pub fn from_batch(b: BatchMessage) -> Self {
        Envelope::Batch(b)
    }

    /// Wraps an AckMessage into a top-level Envelope.
    #[inline]
    pub fn from_ack(a: AckMessage) -> Self {
        Envelope::Ack(a)
    }
}

impl From<BatchMessage> for Envelope {
    #[inline]
    fn from(b: BatchMessage) -> Self {
        Envelope::from_batch(b)
    }
}

impl From<AckMessage> for Envelope {
    #[inline]
    fn from(a: AckMessage) -> Self {
        Envelope::from_ack(a)
    }
}
