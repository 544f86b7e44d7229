use super::escrow::{Destination, EntryId, OwnerId};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

/// Why an owner stopped cycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    CapReached,
    CycleLimit,
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StopReason::CapReached => "cap_reached",
            StopReason::CycleLimit => "cycle_limit",
            StopReason::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Reportable things that happen to escrowed funds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EscrowEvent {
    Held {
        owner: OwnerId,
        entry: EntryId,
        amount: Decimal,
    },
    Released {
        owner: OwnerId,
        entry: EntryId,
        amount: Decimal,
    },
    Delivered {
        owner: OwnerId,
        destination: Destination,
        amount: Decimal,
        attempts: u32,
    },
    TransferFailed {
        owner: OwnerId,
        destination: Destination,
        amount: Decimal,
        attempts: u32,
        permanent: bool,
        reason: String,
    },
    Requeued {
        owner: OwnerId,
        destination: Destination,
        amount: Decimal,
        requeues: u32,
    },
    SentToReview {
        owner: OwnerId,
        destination: Destination,
        amount: Decimal,
        reason: String,
    },
    ReHeld {
        owner: OwnerId,
        entry: EntryId,
        amount: Decimal,
    },
    Amplified {
        owner: OwnerId,
        from: Decimal,
        to: Decimal,
    },
    Settled {
        owner: OwnerId,
        amount: Decimal,
    },
    Stopped {
        owner: OwnerId,
        reason: StopReason,
    },
}
