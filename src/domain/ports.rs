use super::escrow::{Destination, EntryId, EscrowEntry, OwnerId, Placement};
use super::events::EscrowEvent;
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Holds escrow entries per owner.
///
/// Implementations synchronise internally and never block for long, so every
/// method may be called from any task without outside locking.
pub trait EscrowStore: Send + Sync {
    /// Holds `amount` for `owner` until `hold_for` has elapsed.
    fn hold(&self, owner: &OwnerId, amount: Decimal, hold_for: Duration) -> Result<EntryId>;
    /// Holds as much of `amount` as the owner's capacity allows, checking and
    /// placing in one step.
    fn hold_up_to(&self, owner: &OwnerId, amount: Decimal, hold_for: Duration)
    -> Result<Placement>;
    /// Removes and returns every entry due at `now`, oldest `release_at` first.
    fn take_releasable(&self, now: Instant) -> Vec<(OwnerId, EscrowEntry)>;
    /// Sum of the owner's held entries; zero for an unknown owner.
    fn balance(&self, owner: &OwnerId) -> Decimal;
    /// Removes one entry. Returns `false` if it was not held.
    fn remove(&self, owner: &OwnerId, entry: EntryId) -> bool;
}

/// Moves money to a destination.
#[async_trait]
pub trait TransferGateway: Send + Sync {
    async fn send(&self, destination: &Destination, amount: Decimal)
    -> std::result::Result<(), TransferError>;
}

/// Fire-and-forget reporting.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: EscrowEvent);
}

pub type EscrowStoreRef = Arc<dyn EscrowStore>;
pub type TransferGatewayRef = Arc<dyn TransferGateway>;
pub type NotificationSinkRef = Arc<dyn NotificationSink>;
