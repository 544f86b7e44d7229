use crate::domain::escrow::{
    Destination, EntryId, EscrowEntry, EscrowLimits, OwnerId, Placement,
};
use crate::domain::events::EscrowEvent;
use crate::domain::money::Amount;
use crate::domain::ports::{EscrowStore, NotificationSink, TransferGateway};
use crate::error::{EscrowError, Result, TransferError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Default)]
struct Ledger {
    entries: HashMap<OwnerId, Vec<EscrowEntry>>,
    next_id: u64,
}

/// A thread-safe in-memory escrow store.
///
/// All state sits behind one `parking_lot::Mutex` that is only held for the
/// duration of a single operation, which is what makes `take_releasable`
/// atomic with respect to concurrent holds and takes.
#[derive(Clone)]
pub struct InMemoryEscrowStore {
    limits: EscrowLimits,
    ledger: Arc<Mutex<Ledger>>,
}

impl InMemoryEscrowStore {
    pub fn new(limits: EscrowLimits) -> Self {
        Self {
            limits,
            ledger: Arc::new(Mutex::new(Ledger::default())),
        }
    }

    pub fn limits(&self) -> EscrowLimits {
        self.limits
    }

    /// Snapshot of an owner's held entries in hold order.
    pub fn entries(&self, owner: &OwnerId) -> Vec<EscrowEntry> {
        let ledger = self.ledger.lock();
        ledger.entries.get(owner).cloned().unwrap_or_default()
    }
}

fn held_total(entries: &[EscrowEntry]) -> Decimal {
    entries.iter().map(|entry| entry.amount().value()).sum()
}

impl InMemoryEscrowStore {
    fn check_amount(&self, amount: Decimal) -> Result<Amount> {
        if amount > self.limits.max_entry_limit {
            return Err(EscrowError::InvalidAmount(amount));
        }
        Amount::new(amount)
    }

    fn release_at(hold_for: Duration) -> Result<Instant> {
        Instant::now()
            .checked_add(hold_for)
            .ok_or(EscrowError::InvalidHold(hold_for))
    }
}

impl Ledger {
    fn held(&self, owner: &OwnerId) -> Decimal {
        self.entries
            .get(owner)
            .map(|entries| held_total(entries))
            .unwrap_or_default()
    }

    fn insert(&mut self, owner: &OwnerId, amount: Amount, release_at: Instant) -> EntryId {
        self.next_id += 1;
        let id = EntryId(self.next_id);
        self.entries
            .entry(owner.clone())
            .or_default()
            .push(EscrowEntry::new(id, owner.clone(), amount, release_at));
        id
    }
}

impl EscrowStore for InMemoryEscrowStore {
    fn hold(&self, owner: &OwnerId, amount: Decimal, hold_for: Duration) -> Result<EntryId> {
        let amount = self.check_amount(amount)?;
        let release_at = Self::release_at(hold_for)?;

        let mut ledger = self.ledger.lock();
        let available = self.limits.owner_capacity - ledger.held(owner);
        if amount.value() > available {
            return Err(EscrowError::InsufficientCapacity {
                owner: owner.clone(),
                requested: amount.value(),
                available: available.max(Decimal::ZERO),
            });
        }

        let id = ledger.insert(owner, amount, release_at);
        debug!(%owner, entry = %id, %amount, ?hold_for, "held funds");
        Ok(id)
    }

    fn hold_up_to(
        &self,
        owner: &OwnerId,
        amount: Decimal,
        hold_for: Duration,
    ) -> Result<Placement> {
        self.check_amount(amount)?;
        let release_at = Self::release_at(hold_for)?;

        let mut ledger = self.ledger.lock();
        let held = ledger.held(owner);
        let room = (self.limits.owner_capacity - held).max(Decimal::ZERO);
        let Ok(clipped) = Amount::new(amount.min(room)) else {
            return Ok(Placement {
                entry: None,
                placed: Decimal::ZERO,
                held,
            });
        };

        let id = ledger.insert(owner, clipped, release_at);
        debug!(
            %owner,
            entry = %id,
            amount = %clipped,
            requested = %amount,
            "held funds up to capacity"
        );
        Ok(Placement {
            entry: Some(id),
            placed: clipped.value(),
            held: held + clipped.value(),
        })
    }

    fn take_releasable(&self, now: Instant) -> Vec<(OwnerId, EscrowEntry)> {
        let mut released = Vec::new();
        {
            let mut ledger = self.ledger.lock();
            for entries in ledger.entries.values_mut() {
                let (due, keep): (Vec<_>, Vec<_>) = std::mem::take(entries)
                    .into_iter()
                    .partition(|entry| entry.is_releasable(now));
                *entries = keep;
                released.extend(due);
            }
            ledger.entries.retain(|_, entries| !entries.is_empty());
        }

        released.sort_by_key(|entry| (entry.release_at(), entry.id()));
        released
            .into_iter()
            .map(|mut entry| {
                entry.mark_released();
                (entry.owner().clone(), entry)
            })
            .collect()
    }

    fn balance(&self, owner: &OwnerId) -> Decimal {
        self.ledger.lock().held(owner)
    }

    fn remove(&self, owner: &OwnerId, entry: EntryId) -> bool {
        let mut ledger = self.ledger.lock();
        let Some(entries) = ledger.entries.get_mut(owner) else {
            return false;
        };
        let Some(position) = entries.iter().position(|held| held.id() == entry) else {
            return false;
        };
        let mut removed = entries.remove(position);
        removed.mark_removed();
        if entries.is_empty() {
            ledger.entries.remove(owner);
        }
        debug!(%owner, %entry, amount = %removed.amount(), "removed entry");
        true
    }
}

/// A gateway that records deliveries in memory.
///
/// Failures can be scripted per destination; each scripted error is consumed
/// by one call, after which calls succeed again.
#[derive(Default, Clone)]
pub struct InMemoryGateway {
    deliveries: Arc<Mutex<Vec<(Destination, Decimal)>>>,
    failures: Arc<Mutex<HashMap<Destination, VecDeque<TransferError>>>>,
    calls: Arc<AtomicU32>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues errors to return for the next calls to `destination`.
    pub fn fail_with(
        &self,
        destination: &Destination,
        errors: impl IntoIterator<Item = TransferError>,
    ) {
        self.failures
            .lock()
            .entry(destination.clone())
            .or_default()
            .extend(errors);
    }

    pub fn delivered_to(&self, destination: &Destination) -> Decimal {
        self.deliveries
            .lock()
            .iter()
            .filter(|(to, _)| to == destination)
            .map(|(_, amount)| *amount)
            .sum()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransferGateway for InMemoryGateway {
    async fn send(
        &self,
        destination: &Destination,
        amount: Decimal,
    ) -> std::result::Result<(), TransferError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self
            .failures
            .lock()
            .get_mut(destination)
            .and_then(|queue| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }
        self.deliveries.lock().push((destination.clone(), amount));
        Ok(())
    }
}

/// Collects events for later inspection.
#[derive(Default, Clone)]
pub struct InMemoryNotifier {
    events: Arc<Mutex<Vec<EscrowEvent>>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EscrowEvent> {
        self.events.lock().clone()
    }
}

impl NotificationSink for InMemoryNotifier {
    fn notify(&self, event: EscrowEvent) {
        self.events.lock().push(event);
    }
}
