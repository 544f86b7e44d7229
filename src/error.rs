use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

use crate::domain::escrow::OwnerId;

#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),
    #[error("Insufficient capacity for {owner}: requested {requested}, available {available}")]
    InsufficientCapacity {
        owner: OwnerId,
        requested: Decimal,
        available: Decimal,
    },
    #[error("Invalid rates: feedback {feedback} + allocation {allocation} must be below 1")]
    InvalidRates { feedback: Decimal, allocation: Decimal },
    #[error("Invalid hold duration: {0:?}")]
    InvalidHold(Duration),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EscrowError>;

/// Failure reported by a [`TransferGateway`](crate::domain::ports::TransferGateway).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("transient transfer failure: {0}")]
    Transient(String),
    #[error("permanent transfer failure: {0}")]
    Permanent(String),
}

/// Classifies errors for the retry executor.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for TransferError {
    fn is_retryable(&self) -> bool {
        matches!(self, TransferError::Transient(_))
    }
}

/// Outcome of a retried operation that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every permitted attempt failed with a retryable error.
    #[error("exhausted after {attempts} attempt(s): {error}")]
    Exhausted { attempts: u32, error: E },
    /// A non-retryable error stopped the run on the attempt it occurred.
    #[error("rejected on attempt {attempts}: {error}")]
    Rejected { attempts: u32, error: E },
    /// Shutdown was requested while waiting to retry.
    #[error("cancelled after {attempts} attempt(s): {error}")]
    Cancelled { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Rejected { attempts, .. }
            | RetryError::Cancelled { attempts, .. } => *attempts,
        }
    }

    pub fn error(&self) -> &E {
        match self {
            RetryError::Exhausted { error, .. }
            | RetryError::Rejected { error, .. }
            | RetryError::Cancelled { error, .. } => error,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, RetryError::Exhausted { .. })
    }
}
