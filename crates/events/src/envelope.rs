use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{StockKey, TenantId};

/// Envelope for an event, containing multi-tenant + stream metadata.
///
/// A stream is one stock key `(tenant, product, branch)`; `sequence_number` is the
/// 1-based position of the movement in that key's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    stream: StockKey,
    stream_type: String,

    /// Monotonically increasing position in the stream.
    sequence_number: u64,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        stream: StockKey,
        stream_type: impl Into<String>,
        sequence_number: u64,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream,
            stream_type: stream_type.into(),
            sequence_number,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.stream.tenant_id
    }

    pub fn stream(&self) -> StockKey {
        self.stream
    }

    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}
