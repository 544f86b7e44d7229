use super::registry::{CycleState, TaskRegistry};
use super::retry::RetryPolicy;
use super::shutdown::{StopSignal, StopTrigger, stop_channel};
use crate::config::EscrowConfig;
use crate::domain::compounding;
use crate::domain::escrow::{Destination, EntryId, EscrowEntry, OwnerId};
use crate::domain::events::{EscrowEvent, StopReason};
use crate::domain::ports::{EscrowStoreRef, NotificationSinkRef, TransferGatewayRef};
use crate::error::{Result, RetryError};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::future::Future;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Most entries a single compounding pass adds for one owner.
const MAX_GROWTH_CHUNKS_PER_PASS: usize = 64;

/// Entries and queued transfers a release tick works on at once.
const MAX_PARALLEL_RELEASES: usize = 64;

/// An allocation waiting to be (re)sent.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTransfer {
    pub owner: OwnerId,
    pub entry: EntryId,
    pub destination: Destination,
    pub amount: Decimal,
    /// How many times this allocation has gone back on the queue.
    pub requeues: u32,
    pub last_error: Option<String>,
}

/// What one release tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub released: usize,
    pub delivered: usize,
    pub requeued: usize,
    pub reviewed: usize,
    pub reheld: usize,
    pub settled: usize,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn tally(&mut self, outcome: Disbursement) {
        match outcome {
            Disbursement::Delivered => self.delivered += 1,
            Disbursement::Requeued => self.requeued += 1,
            Disbursement::Reviewed => self.reviewed += 1,
        }
    }

    fn absorb(&mut self, joined: std::result::Result<TickReport, JoinError>) {
        match joined {
            Ok(other) => {
                self.released += other.released;
                self.delivered += other.delivered;
                self.requeued += other.requeued;
                self.reviewed += other.reviewed;
                self.reheld += other.reheld;
                self.settled += other.settled;
            }
            Err(e) => error!(error = %e, "release work ended abnormally"),
        }
    }
}

/// Per-owner totals for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnerSummary {
    pub owner: OwnerId,
    pub held: Decimal,
    pub delivered: Decimal,
    pub settled: Decimal,
    pub cycles: u32,
    pub state: CycleState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disbursement {
    Delivered,
    Requeued,
    Reviewed,
}

/// Drives escrowed funds through release, split, disbursement and re-hold.
///
/// The store is the only place balances live; the scheduler reads and changes
/// it exclusively through `hold`, `take_releasable`, `balance` and `remove`.
pub struct ReleaseScheduler {
    config: EscrowConfig,
    retry: RetryPolicy,
    store: EscrowStoreRef,
    gateway: TransferGatewayRef,
    notifier: NotificationSinkRef,
    registry: TaskRegistry,
    pending: Mutex<VecDeque<PendingTransfer>>,
    review: Mutex<Vec<PendingTransfer>>,
}

impl ReleaseScheduler {
    pub fn new(
        config: EscrowConfig,
        store: EscrowStoreRef,
        gateway: TransferGatewayRef,
        notifier: NotificationSinkRef,
    ) -> Result<Self> {
        config.validate()?;
        let retry = RetryPolicy::new(config.max_retry_attempts, config.retry_base_delay);
        Ok(Self {
            config,
            retry,
            store,
            gateway,
            notifier,
            registry: TaskRegistry::new(),
            pending: Mutex::new(VecDeque::new()),
            review: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &EscrowConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Escrows an inbound payment and registers the owner's compounding task.
    ///
    /// Deposits for a stopped owner are still held and disbursed on release,
    /// but their remainder is settled instead of re-held.
    pub fn deposit(&self, owner: &OwnerId, amount: Decimal) -> Result<EntryId> {
        let entry = self
            .store
            .hold(owner, amount, self.config.hold_duration())?;
        if self.registry.register(owner) {
            debug!(%owner, "registered compounding task");
        } else if !self.registry.is_active(owner) {
            debug!(
                %owner,
                entry = %entry,
                %amount,
                "deposit for stopped owner will settle on release"
            );
        }
        self.notifier.notify(EscrowEvent::Held {
            owner: owner.clone(),
            entry,
            amount,
        });
        Ok(entry)
    }

    pub fn cancel_entry(&self, owner: &OwnerId, entry: EntryId) -> bool {
        self.store.remove(owner, entry)
    }

    /// Stops re-holding for `owner`. Funds already held still release normally.
    pub fn cancel_owner(&self, owner: &OwnerId) -> bool {
        self.stop_owner(owner, StopReason::Cancelled)
    }

    pub fn pending_transfers(&self) -> Vec<PendingTransfer> {
        self.pending.lock().iter().cloned().collect()
    }

    /// Allocations that need an operator.
    pub fn review_queue(&self) -> Vec<PendingTransfer> {
        self.review.lock().clone()
    }

    pub fn summaries(&self) -> Vec<OwnerSummary> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|(owner, task)| OwnerSummary {
                held: self.store.balance(&owner),
                owner,
                delivered: task.delivered,
                settled: task.settled,
                cycles: task.cycles,
                state: task.state,
            })
            .collect()
    }

    /// Starts the release and compounding loops.
    pub fn spawn(self: Arc<Self>) -> SchedulerHandle {
        let (trigger, signal) = stop_channel();
        let release = tokio::spawn(Arc::clone(&self).release_loop(signal.clone()));
        let compound = tokio::spawn(self.compound_loop(signal));
        SchedulerHandle {
            trigger,
            tasks: vec![release, compound],
        }
    }

    async fn release_loop(self: Arc<Self>, mut stop: StopSignal) {
        let mut ticker = tokio::time::interval(self.config.release_tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.config.release_tick_interval, "release loop started");
        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = ticker.tick() => {}
            }
            let report = self.release_tick(&stop).await;
            if !report.is_empty() {
                info!(
                    released = report.released,
                    delivered = report.delivered,
                    requeued = report.requeued,
                    reviewed = report.reviewed,
                    reheld = report.reheld,
                    settled = report.settled,
                    "release tick"
                );
            }
        }
        info!("release loop stopped");
    }

    async fn compound_loop(self: Arc<Self>, mut stop: StopSignal) {
        let mut ticker = tokio::time::interval(self.config.compound_tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.config.compound_tick_interval, "compound loop started");
        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => break,
                _ = ticker.tick() => {}
            }
            let amplified = self.compound_tick();
            if amplified > 0 {
                debug!(owners = amplified, "compound tick");
            }
        }
        info!("compound loop stopped");
    }

    /// One release pass: retries queued allocations, then takes every due entry
    /// and runs it through split, disbursement and re-hold.
    ///
    /// Work is submitted in `release_at` order and runs concurrently, at most
    /// `MAX_PARALLEL_RELEASES` at a time, so one entry's backoff does not hold
    /// up the rest of the batch. Returns once all of it has finished.
    pub async fn release_tick(self: &Arc<Self>, stop: &StopSignal) -> TickReport {
        let mut report = TickReport::default();
        let mut running = JoinSet::new();

        let queued: Vec<PendingTransfer> = self.pending.lock().drain(..).collect();
        for transfer in queued {
            let this = Arc::clone(self);
            let stop = stop.clone();
            let work = async move {
                let mut report = TickReport::default();
                report.tally(this.disburse(transfer, &stop).await);
                report
            };
            submit(&mut running, &mut report, work).await;
        }

        let batch = self.store.take_releasable(Instant::now());
        trace!(entries = batch.len(), "took releasable entries");
        for (owner, entry) in batch {
            let this = Arc::clone(self);
            let stop = stop.clone();
            let work = async move {
                let mut report = TickReport {
                    released: 1,
                    ..TickReport::default()
                };
                this.process_entry(&owner, entry, &stop, &mut report).await;
                report
            };
            submit(&mut running, &mut report, work).await;
        }

        while let Some(joined) = running.join_next().await {
            report.absorb(joined);
        }
        report
    }

    async fn process_entry(
        &self,
        owner: &OwnerId,
        entry: EscrowEntry,
        stop: &StopSignal,
        report: &mut TickReport,
    ) {
        let amount = entry.amount().value();
        self.registry.transition(owner, CycleState::Releasing);
        self.notifier.notify(EscrowEvent::Released {
            owner: owner.clone(),
            entry: entry.id(),
            amount,
        });

        self.registry.transition(owner, CycleState::Compounding);
        let split = match compounding::split(
            amount,
            self.config.feedback_rate,
            self.config.allocation_rate,
        ) {
            Ok(split) => split,
            Err(e) => {
                error!(%owner, entry = %entry.id(), %amount, error = %e, "split failed");
                self.settle(owner, amount);
                report.settled += 1;
                return;
            }
        };

        self.registry.transition(owner, CycleState::Disbursing);
        let allocation = self.allocation(
            owner,
            entry.id(),
            &self.config.allocation_destination,
            split.allocation_a,
        );
        let feedback = self.allocation(
            owner,
            entry.id(),
            &self.config.feedback_destination,
            split.allocation_b,
        );
        let (first, second) = tokio::join!(
            self.disburse_some(allocation, stop),
            self.disburse_some(feedback, stop)
        );
        for outcome in [first, second].into_iter().flatten() {
            report.tally(outcome);
        }

        let cycles = self.registry.complete_cycle(owner);
        self.rehold(owner, split.remainder, cycles, report);
    }

    fn allocation(
        &self,
        owner: &OwnerId,
        entry: EntryId,
        destination: &Destination,
        amount: Decimal,
    ) -> Option<PendingTransfer> {
        (amount > Decimal::ZERO).then(|| PendingTransfer {
            owner: owner.clone(),
            entry,
            destination: destination.clone(),
            amount,
            requeues: 0,
            last_error: None,
        })
    }

    async fn disburse_some(
        &self,
        transfer: Option<PendingTransfer>,
        stop: &StopSignal,
    ) -> Option<Disbursement> {
        match transfer {
            Some(transfer) => Some(self.disburse(transfer, stop).await),
            None => None,
        }
    }

    async fn disburse(&self, mut transfer: PendingTransfer, stop: &StopSignal) -> Disbursement {
        let mut attempts = 0;
        let result = self
            .retry
            .run(stop, |attempt| {
                attempts = attempt;
                let gateway = Arc::clone(&self.gateway);
                let destination = transfer.destination.clone();
                let amount = transfer.amount;
                async move { gateway.send(&destination, amount).await }
            })
            .await;

        match result {
            Ok(()) => {
                self.registry
                    .record_delivered(&transfer.owner, transfer.amount);
                self.notifier.notify(EscrowEvent::Delivered {
                    owner: transfer.owner,
                    destination: transfer.destination,
                    amount: transfer.amount,
                    attempts,
                });
                Disbursement::Delivered
            }
            Err(RetryError::Cancelled { error, .. }) => {
                debug!(
                    owner = %transfer.owner,
                    destination = %transfer.destination,
                    "transfer interrupted by shutdown"
                );
                transfer.last_error = Some(error.to_string());
                self.pending.lock().push_back(transfer);
                Disbursement::Requeued
            }
            Err(failure) => {
                let permanent = matches!(failure, RetryError::Rejected { .. });
                let reason = failure.error().to_string();
                self.notifier.notify(EscrowEvent::TransferFailed {
                    owner: transfer.owner.clone(),
                    destination: transfer.destination.clone(),
                    amount: transfer.amount,
                    attempts: failure.attempts(),
                    permanent,
                    reason: reason.clone(),
                });
                transfer.last_error = Some(reason.clone());
                if permanent {
                    self.send_to_review(transfer, reason)
                } else {
                    self.requeue(transfer)
                }
            }
        }
    }

    fn requeue(&self, mut transfer: PendingTransfer) -> Disbursement {
        if transfer.requeues >= self.config.max_requeue_cycles {
            return self.send_to_review(transfer, "re-queue limit reached".to_string());
        }
        transfer.requeues += 1;
        self.notifier.notify(EscrowEvent::Requeued {
            owner: transfer.owner.clone(),
            destination: transfer.destination.clone(),
            amount: transfer.amount,
            requeues: transfer.requeues,
        });
        self.pending.lock().push_back(transfer);
        Disbursement::Requeued
    }

    fn send_to_review(&self, transfer: PendingTransfer, reason: String) -> Disbursement {
        self.notifier.notify(EscrowEvent::SentToReview {
            owner: transfer.owner.clone(),
            destination: transfer.destination.clone(),
            amount: transfer.amount,
            reason,
        });
        self.review.lock().push(transfer);
        Disbursement::Reviewed
    }

    /// Puts the remainder back in escrow while the owner is active, under the
    /// cycle limit and below the cap. Whatever cannot be re-held is settled.
    fn rehold(
        &self,
        owner: &OwnerId,
        remainder: Decimal,
        cycles: u32,
        report: &mut TickReport,
    ) {
        if remainder <= Decimal::ZERO {
            self.registry.transition(owner, CycleState::Idle);
            return;
        }
        if !self.registry.is_active(owner) {
            self.settle(owner, remainder);
            report.settled += 1;
            return;
        }
        if cycles >= self.config.max_cycles_per_owner {
            self.stop_owner(owner, StopReason::CycleLimit);
            self.settle(owner, remainder);
            report.settled += 1;
            return;
        }

        let placement = match self
            .store
            .hold_up_to(owner, remainder, self.config.hold_duration())
        {
            Ok(placement) => placement,
            Err(e) => {
                warn!(
                    %owner,
                    amount = %remainder,
                    error = %e,
                    "could not re-hold remainder"
                );
                self.settle(owner, remainder);
                report.settled += 1;
                return;
            }
        };

        if let Some(entry) = placement.entry {
            self.registry.transition(owner, CycleState::ReHeld);
            self.notifier.notify(EscrowEvent::ReHeld {
                owner: owner.clone(),
                entry,
                amount: placement.placed,
            });
            report.reheld += 1;
        }

        let unplaced = remainder - placement.placed;
        if unplaced > Decimal::ZERO {
            self.stop_owner(owner, StopReason::CapReached);
            self.settle(owner, unplaced);
            report.settled += 1;
        } else if placement.held >= self.config.global_cap {
            self.stop_owner(owner, StopReason::CapReached);
        }
    }

    /// One compounding pass over active owners. Growth is held as new entries
    /// and so flows through the normal release pipeline. Returns how many
    /// owners grew.
    pub fn compound_tick(&self) -> usize {
        let cap = self.config.global_cap;
        let mut grown = 0;
        for owner in self.registry.active_owners() {
            let balance = self.store.balance(&owner);
            if balance <= Decimal::ZERO {
                continue;
            }
            let amplified = compounding::amplify(balance, cap, &self.config.growth);
            let mut growth = amplified - balance;
            let mut added = Decimal::ZERO;
            let mut held = balance;

            for _ in 0..MAX_GROWTH_CHUNKS_PER_PASS {
                if growth <= Decimal::ZERO {
                    break;
                }
                let chunk = growth.min(self.config.max_entry_limit);
                match self
                    .store
                    .hold_up_to(&owner, chunk, self.config.hold_duration())
                {
                    Ok(placement) => {
                        held = placement.held;
                        growth -= placement.placed;
                        added += placement.placed;
                        if placement.placed < chunk {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(%owner, amount = %chunk, error = %e, "growth not held");
                        break;
                    }
                }
            }

            if added > Decimal::ZERO {
                grown += 1;
                self.notifier.notify(EscrowEvent::Amplified {
                    owner: owner.clone(),
                    from: balance,
                    to: balance + added,
                });
            }
            if held >= cap {
                self.stop_owner(&owner, StopReason::CapReached);
            }
        }
        grown
    }

    fn settle(&self, owner: &OwnerId, amount: Decimal) {
        self.registry.record_settled(owner, amount);
        self.notifier.notify(EscrowEvent::Settled {
            owner: owner.clone(),
            amount,
        });
    }

    fn stop_owner(&self, owner: &OwnerId, reason: StopReason) -> bool {
        let stopped = self.registry.stop(owner, reason);
        if stopped {
            self.notifier.notify(EscrowEvent::Stopped {
                owner: owner.clone(),
                reason,
            });
        }
        stopped
    }
}

/// Starts `work` once fewer than `MAX_PARALLEL_RELEASES` tasks are running.
async fn submit<F>(running: &mut JoinSet<TickReport>, report: &mut TickReport, work: F)
where
    F: Future<Output = TickReport> + Send + 'static,
{
    if running.len() >= MAX_PARALLEL_RELEASES {
        if let Some(joined) = running.join_next().await {
            report.absorb(joined);
        }
    }
    running.spawn(work);
}

/// Running scheduler loops.
pub struct SchedulerHandle {
    trigger: StopTrigger,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Requests a stop and waits for in-flight ticks to finish their batch.
    pub async fn stop(self) {
        self.trigger.stop();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "scheduler task ended abnormally");
            }
        }
    }
}
