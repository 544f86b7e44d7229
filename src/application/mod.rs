//! Application layer: the release scheduler and the machinery it runs on.
//!
//! `ReleaseScheduler` owns two periodic `tokio` tasks (release and compound)
//! that share one escrow store. Both go through the store's atomic operations
//! only; neither keeps a private copy of any balance.

pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod shutdown;
