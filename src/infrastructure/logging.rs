use crate::domain::escrow::Destination;
use crate::domain::events::EscrowEvent;
use crate::domain::ports::{NotificationSink, TransferGateway};
use crate::error::TransferError;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

/// Dry-run gateway: logs each transfer and reports success.
#[derive(Debug, Default, Clone)]
pub struct LoggingGateway;

impl LoggingGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TransferGateway for LoggingGateway {
    async fn send(&self, destination: &Destination, amount: Decimal) -> Result<(), TransferError> {
        if destination.as_str().trim().is_empty() {
            return Err(TransferError::Permanent("empty destination".to_string()));
        }
        info!(%destination, %amount, "transfer sent (dry run)");
        Ok(())
    }
}

/// Reports events through `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingNotifier;

impl TracingNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationSink for TracingNotifier {
    fn notify(&self, event: EscrowEvent) {
        match event {
            EscrowEvent::Held { owner, entry, amount } => {
                info!(%owner, %entry, %amount, "funds held")
            }
            EscrowEvent::Released { owner, entry, amount } => {
                info!(%owner, %entry, %amount, "funds released")
            }
            EscrowEvent::Delivered {
                owner,
                destination,
                amount,
                attempts,
            } => info!(%owner, %destination, %amount, attempts, "allocation delivered"),
            EscrowEvent::TransferFailed {
                owner,
                destination,
                amount,
                attempts,
                permanent,
                reason,
            } => error!(
                %owner,
                %destination,
                %amount,
                attempts,
                permanent,
                %reason,
                "allocation transfer failed"
            ),
            EscrowEvent::Requeued {
                owner,
                destination,
                amount,
                requeues,
            } => warn!(%owner, %destination, %amount, requeues, "allocation re-queued"),
            EscrowEvent::SentToReview {
                owner,
                destination,
                amount,
                reason,
            } => error!(%owner, %destination, %amount, %reason, "allocation sent to review"),
            EscrowEvent::ReHeld { owner, entry, amount } => {
                info!(%owner, %entry, %amount, "remainder re-held")
            }
            EscrowEvent::Amplified { owner, from, to } => {
                info!(%owner, %from, %to, "balance amplified")
            }
            EscrowEvent::Settled { owner, amount } => info!(%owner, %amount, "remainder settled"),
            EscrowEvent::Stopped { owner, reason } => info!(%owner, %reason, "owner stopped"),
        }
    }
}
