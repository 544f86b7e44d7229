use super::money::Amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Identifies the owner of escrowed funds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a disbursed allocation is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Destination {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store-assigned identity of an escrow entry.
///
/// Ids increase monotonically, so they also encode hold order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Held,
    Released,
    Removed,
}

/// Bounds enforced on every hold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EscrowLimits {
    /// Largest amount a single entry may carry.
    pub max_entry_limit: Decimal,
    /// Largest total an owner may have held at once.
    pub owner_capacity: Decimal,
}

/// Outcome of a hold clipped to the owner's remaining capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// The new entry, or `None` when there was no room at all.
    pub entry: Option<EntryId>,
    pub placed: Decimal,
    /// The owner's held total once the hold went through.
    pub held: Decimal,
}

/// Funds held for one owner until `release_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct EscrowEntry {
    id: EntryId,
    owner: OwnerId,
    amount: Amount,
    release_at: Instant,
    state: EntryState,
}

impl EscrowEntry {
    pub fn new(id: EntryId, owner: OwnerId, amount: Amount, release_at: Instant) -> Self {
        Self {
            id,
            owner,
            amount,
            release_at,
            state: EntryState::Held,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn amount(&self) -> Amount {
        self.amount
    }

    pub fn release_at(&self) -> Instant {
        self.release_at
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    pub fn is_releasable(&self, now: Instant) -> bool {
        self.state == EntryState::Held && self.release_at <= now
    }

    pub(crate) fn mark_released(&mut self) {
        self.state = EntryState::Released;
    }

    pub(crate) fn mark_removed(&mut self) {
        self.state = EntryState::Removed;
    }
}
