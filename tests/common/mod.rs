#![allow(dead_code)]

use escrow_cycle::application::scheduler::ReleaseScheduler;
use escrow_cycle::config::EscrowConfig;
use escrow_cycle::domain::escrow::Destination;
use escrow_cycle::infrastructure::in_memory::{
    InMemoryEscrowStore, InMemoryGateway, InMemoryNotifier,
};
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

/// A scheduler wired to in-memory adapters, with handles kept for inspection.
pub struct Harness {
    pub scheduler: Arc<ReleaseScheduler>,
    pub store: InMemoryEscrowStore,
    pub gateway: InMemoryGateway,
    pub notifier: InMemoryNotifier,
}

impl Harness {
    pub fn new(config: EscrowConfig) -> Self {
        let store = InMemoryEscrowStore::new(config.limits());
        let gateway = InMemoryGateway::new();
        let notifier = InMemoryNotifier::new();
        let scheduler = ReleaseScheduler::new(
            config,
            Arc::new(store.clone()),
            Arc::new(gateway.clone()),
            Arc::new(notifier.clone()),
        )
        .expect("valid config");
        Self {
            scheduler: Arc::new(scheduler),
            store,
            gateway,
            notifier,
        }
    }

    pub fn allocation_destination(&self) -> Destination {
        self.scheduler.config().allocation_destination.clone()
    }

    pub fn feedback_destination(&self) -> Destination {
        self.scheduler.config().feedback_destination.clone()
    }
}

/// Releases immediately and runs exactly one cycle per owner.
pub fn single_cycle_config() -> EscrowConfig {
    EscrowConfig {
        hold_seconds: 0,
        max_cycles_per_owner: 1,
        ..EscrowConfig::default()
    }
}

pub fn write_deposits(path: &Path, rows: &[(&str, &str)]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(["owner", "amount"])?;
    for (owner, amount) in rows {
        wtr.write_record([*owner, *amount])?;
    }
    wtr.flush()?;
    Ok(())
}
