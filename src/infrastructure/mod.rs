//! Adapters behind the domain ports.

pub mod in_memory;
pub mod logging;
