//! Static configuration, fixed at startup.
//!
//! [`EscrowConfig`] is deserialized from JSON with every field optional; missing
//! fields take the reference defaults. Call [`EscrowConfig::validate`] once
//! before handing the value to the store and scheduler.

use crate::domain::compounding::{Growth, validate_rates};
use crate::domain::escrow::{Destination, EscrowLimits};
use crate::error::{EscrowError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    /// How long deposits and re-held remainders stay in escrow.
    pub hold_seconds: u64,
    pub feedback_rate: Decimal,
    pub allocation_rate: Decimal,
    /// Hard ceiling on what one owner may have held.
    pub global_cap: Decimal,
    pub max_entry_limit: Decimal,
    #[serde(rename = "release_tick_interval_ms", with = "millis")]
    pub release_tick_interval: Duration,
    #[serde(rename = "compound_tick_interval_ms", with = "millis")]
    pub compound_tick_interval: Duration,
    pub max_retry_attempts: u32,
    #[serde(rename = "retry_base_delay_ms", with = "millis")]
    pub retry_base_delay: Duration,
    /// Times a failed allocation goes back on the queue before review.
    pub max_requeue_cycles: u32,
    pub max_cycles_per_owner: u32,
    pub feedback_destination: Destination,
    pub allocation_destination: Destination,
    pub growth: Growth,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            hold_seconds: 30,
            feedback_rate: dec!(0.03),
            allocation_rate: dec!(0.01),
            global_cap: dec!(400_000_000_000_000_000),
            max_entry_limit: dec!(3_000_000),
            release_tick_interval: Duration::from_secs(45),
            compound_tick_interval: Duration::from_secs(3),
            max_retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            max_requeue_cycles: 3,
            max_cycles_per_owner: 100,
            feedback_destination: Destination::from("feedback"),
            allocation_destination: Destination::from("allocation"),
            growth: Growth::Flat,
        }
    }
}

impl EscrowConfig {
    /// Reads a JSON config file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let config = serde_json::from_reader(std::io::BufReader::new(file))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_rates(self.feedback_rate, self.allocation_rate)?;
        self.growth.validate()?;

        if self.global_cap <= Decimal::ZERO {
            return Err(invalid("global_cap must be positive"));
        }
        if self.max_entry_limit <= Decimal::ZERO {
            return Err(invalid("max_entry_limit must be positive"));
        }
        if self.max_retry_attempts == 0 {
            return Err(invalid("max_retry_attempts must be at least 1"));
        }
        if self.release_tick_interval.is_zero() || self.compound_tick_interval.is_zero() {
            return Err(invalid("tick intervals must be non-zero"));
        }
        if self.feedback_destination.as_str().is_empty()
            || self.allocation_destination.as_str().is_empty()
        {
            return Err(invalid("destinations must not be empty"));
        }
        Ok(())
    }

    pub fn hold_duration(&self) -> Duration {
        Duration::from_secs(self.hold_seconds)
    }

    pub fn limits(&self) -> EscrowLimits {
        EscrowLimits {
            max_entry_limit: self.max_entry_limit,
            owner_capacity: self.global_cap,
        }
    }
}

fn invalid(message: &str) -> EscrowError {
    EscrowError::InvalidConfig(message.to_string())
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
