use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, MovementId, StockKey, TransferId, UserId};
use stockledger_events::Event;

/// Whether a movement adds to or removes from the on-hand quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Closed set of stock movement kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    /// Opening balance when a product is first stocked at a branch.
    Initial,
    Purchase,
    Sale,
    /// Customer return (goods come back in).
    ReturnIn,
    /// Return to supplier (goods go out).
    ReturnOut,
    AdjustmentIn,
    AdjustmentOut,
    TransferIn,
    TransferOut,
}

impl MovementType {
    pub const ALL: [MovementType; 9] = [
        MovementType::Initial,
        MovementType::Purchase,
        MovementType::Sale,
        MovementType::ReturnIn,
        MovementType::ReturnOut,
        MovementType::AdjustmentIn,
        MovementType::AdjustmentOut,
        MovementType::TransferIn,
        MovementType::TransferOut,
    ];

    pub fn direction(self) -> Direction {
        match self {
            MovementType::Initial
            | MovementType::Purchase
            | MovementType::ReturnIn
            | MovementType::AdjustmentIn
            | MovementType::TransferIn => Direction::Inbound,
            MovementType::Sale
            | MovementType::ReturnOut
            | MovementType::AdjustmentOut
            | MovementType::TransferOut => Direction::Outbound,
        }
    }

    pub fn is_outbound(self) -> bool {
        self.direction() == Direction::Outbound
    }

    pub fn is_transfer(self) -> bool {
        matches!(self, MovementType::TransferIn | MovementType::TransferOut)
    }

    /// Signed quantity delta for a positive magnitude.
    pub fn signed_delta(self, magnitude: i64) -> i64 {
        match self.direction() {
            Direction::Inbound => magnitude,
            Direction::Outbound => -magnitude,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Initial => "initial",
            MovementType::Purchase => "purchase",
            MovementType::Sale => "sale",
            MovementType::ReturnIn => "return_in",
            MovementType::ReturnOut => "return_out",
            MovementType::AdjustmentIn => "adjustment_in",
            MovementType::AdjustmentOut => "adjustment_out",
            MovementType::TransferIn => "transfer_in",
            MovementType::TransferOut => "transfer_out",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type '{s}'")))
    }
}

/// What kind of business document caused a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Invoice,
    PurchaseBill,
    CreditNote,
    DebitNote,
    StockAudit,
    TransferChallan,
    /// Reversal of a transfer's outbound leg after the inbound leg failed.
    TransferCompensation,
    Opening,
    Manual,
}

/// Optional link from a movement back to the document that caused it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MovementReference {
    pub reference_type: ReferenceType,
    pub reference_id: String,
}

impl MovementReference {
    pub fn new(reference_type: ReferenceType, reference_id: impl Into<String>) -> Self {
        Self {
            reference_type,
            reference_id: reference_id.into(),
        }
    }
}

/// A movement ready to be appended (not yet assigned an id or sequence).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub key: StockKey,
    pub movement_type: MovementType,
    /// Signed quantity change; the sign must agree with `movement_type`.
    pub delta: i64,
    pub transfer_id: Option<TransferId>,
    pub reference: Option<MovementReference>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl NewMovement {
    /// Structural checks every ledger backend runs before appending.
    ///
    /// This never looks at stock levels; business rules live in the adjustment path.
    pub fn validate(&self) -> DomainResult<()> {
        if self.delta == 0 {
            return Err(DomainError::validation("movement delta cannot be zero"));
        }

        let sign_ok = match self.movement_type.direction() {
            Direction::Inbound => self.delta > 0,
            Direction::Outbound => self.delta < 0,
        };
        if !sign_ok {
            return Err(DomainError::validation(format!(
                "delta {} does not match direction of '{}'",
                self.delta, self.movement_type
            )));
        }

        match (self.movement_type.is_transfer(), self.transfer_id.is_some()) {
            (true, false) => Err(DomainError::validation(format!(
                "'{}' movement requires a transfer id",
                self.movement_type
            ))),
            (false, true) => Err(DomainError::validation(format!(
                "'{}' movement cannot carry a transfer id",
                self.movement_type
            ))),
            _ => Ok(()),
        }
    }

    /// Attach ledger-assigned identity.
    pub fn into_recorded(self, id: MovementId, sequence: u64) -> StockMovement {
        StockMovement {
            id,
            key: self.key,
            sequence,
            movement_type: self.movement_type,
            delta: self.delta,
            transfer_id: self.transfer_id,
            reference: self.reference,
            actor: self.actor,
            occurred_at: self.occurred_at,
        }
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub key: StockKey,
    /// 1-based append position within `key`.
    pub sequence: u64,
    pub movement_type: MovementType,
    pub delta: i64,
    pub transfer_id: Option<TransferId>,
    pub reference: Option<MovementReference>,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn magnitude(&self) -> i64 {
        self.delta.abs()
    }
}

/// Event published once a movement is committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    MovementRecorded(StockMovement),
}

impl LedgerEvent {
    pub const STREAM_TYPE: &'static str = "inventory.stock";

    pub fn movement(&self) -> &StockMovement {
        match self {
            LedgerEvent::MovementRecorded(m) => m,
        }
    }
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::MovementRecorded(_) => "inventory.movement.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::MovementRecorded(m) => m.occurred_at,
        }
    }
}
