//! Domain layer: escrow types, pure compounding arithmetic and the ports the
//! application layer talks through.

pub mod compounding;
pub mod escrow;
pub mod events;
pub mod money;
pub mod ports;
