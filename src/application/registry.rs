use crate::domain::escrow::OwnerId;
use crate::domain::events::StopReason;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Where an owner is in the release/compound cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleState {
    Idle,
    Releasing,
    Compounding,
    Disbursing,
    ReHeld,
    Stopped,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CycleState::Idle => "idle",
            CycleState::Releasing => "releasing",
            CycleState::Compounding => "compounding",
            CycleState::Disbursing => "disbursing",
            CycleState::ReHeld => "reheld",
            CycleState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Runtime bookkeeping for one owner's compounding loop. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundingTask {
    pub state: CycleState,
    pub cycles: u32,
    pub delivered: Decimal,
    pub settled: Decimal,
    pub stop_reason: Option<StopReason>,
}

impl CompoundingTask {
    fn new() -> Self {
        Self {
            state: CycleState::Idle,
            cycles: 0,
            delivered: Decimal::ZERO,
            settled: Decimal::ZERO,
            stop_reason: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state != CycleState::Stopped
    }
}

/// Registry of per-owner compounding tasks.
///
/// A task is created on an owner's first deposit and lives until it is
/// stopped or the process exits. Stopped tasks stay registered so their
/// totals can still be reported.
#[derive(Debug, Default, Clone)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<BTreeMap<OwnerId, CompoundingTask>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `owner` if unseen. Returns `true` when a task was created.
    pub fn register(&self, owner: &OwnerId) -> bool {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(owner) {
            return false;
        }
        tasks.insert(owner.clone(), CompoundingTask::new());
        true
    }

    pub fn get(&self, owner: &OwnerId) -> Option<CompoundingTask> {
        self.tasks.lock().get(owner).cloned()
    }

    pub fn is_active(&self, owner: &OwnerId) -> bool {
        self.tasks
            .lock()
            .get(owner)
            .is_some_and(CompoundingTask::is_active)
    }

    /// Moves an active owner to `state`. Stopped owners stay stopped.
    pub fn transition(&self, owner: &OwnerId, state: CycleState) {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .entry(owner.clone())
            .or_insert_with(CompoundingTask::new);
        if task.is_active() {
            trace!(%owner, from = %task.state, to = %state, "cycle transition");
            task.state = state;
        }
    }

    /// Stops an owner. Returns `false` if it was already stopped.
    pub fn stop(&self, owner: &OwnerId, reason: StopReason) -> bool {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .entry(owner.clone())
            .or_insert_with(CompoundingTask::new);
        if !task.is_active() {
            return false;
        }
        task.state = CycleState::Stopped;
        task.stop_reason = Some(reason);
        true
    }

    /// Counts a completed release cycle and returns the new total.
    pub fn complete_cycle(&self, owner: &OwnerId) -> u32 {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .entry(owner.clone())
            .or_insert_with(CompoundingTask::new);
        task.cycles = task.cycles.saturating_add(1);
        task.cycles
    }

    pub fn record_delivered(&self, owner: &OwnerId, amount: Decimal) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get_mut(owner) {
            task.delivered += amount;
        }
    }

    pub fn record_settled(&self, owner: &OwnerId, amount: Decimal) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get_mut(owner) {
            task.settled += amount;
        }
    }

    pub fn active_owners(&self) -> Vec<OwnerId> {
        self.tasks
            .lock()
            .iter()
            .filter(|(_, task)| task.is_active())
            .map(|(owner, _)| owner.clone())
            .collect()
    }

    /// All tasks ordered by owner.
    pub fn snapshot(&self) -> Vec<(OwnerId, CompoundingTask)> {
        self.tasks
            .lock()
            .iter()
            .map(|(owner, task)| (owner.clone(), task.clone()))
            .collect()
    }
}
