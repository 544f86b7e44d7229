use crate::domain::escrow::OwnerId;
use crate::error::{EscrowError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// An inbound payment receipt.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Deposit {
    pub owner: OwnerId,
    pub amount: Decimal,
}

/// Reads deposits from a CSV source with an `owner, amount` header.
///
/// Whitespace is trimmed and record lengths are flexible, so a sloppy row
/// fails on its own without ending the stream.
pub struct DepositReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> DepositReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes deposits, one `Result` per row.
    pub fn deposits(self) -> impl Iterator<Item = Result<Deposit>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(EscrowError::from))
    }
}
