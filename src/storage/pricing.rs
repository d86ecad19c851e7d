use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::ledger::models::Wei;

/// Storage price source. The model itself is owned by the storage provider; this crate only
/// consumes it.
pub trait StorageCostModel: Send + Sync {
    fn cost(&self, size_bytes: u64, duration_days: u32) -> AppResult<Wei>;
}

/// `max(size * days * wei_per_byte_day, minimum_charge)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinearPricing {
    pub wei_per_byte_day: Wei,
    pub minimum_charge: Wei,
}

impl StorageCostModel for LinearPricing {
    fn cost(&self, size_bytes: u64, duration_days: u32) -> AppResult<Wei> {
        if size_bytes == 0 || duration_days == 0 {
            return Err(AppError::InvalidInput(
                "size and duration must both be positive".to_string(),
            ));
        }

        let overflow = || AppError::InvalidInput("storage cost overflows".to_string());
        let cost = self
            .wei_per_byte_day
            .checked_mul(size_bytes)
            .and_then(|c| c.checked_mul(duration_days as u64))
            .ok_or_else(overflow)?;

        Ok(if cost < self.minimum_charge {
            self.minimum_charge
        } else {
            cost
        })
    }
}
