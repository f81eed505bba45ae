//! Revenue-sharing and limit parameters applied to money-moving events.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::{Date, OffsetDateTime, UtcOffset};

use crate::money::Money;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("{name} must be between 0 and 1, got {value}")]
    RateOutOfRange { name: &'static str, value: Decimal },
    #[error("min_top_up ({min}) exceeds max_top_up ({max})")]
    TopUpBounds { min: Money, max: Money },
    #[error("utc_offset_minutes {0} is not a valid UTC offset")]
    UtcOffset(i16),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Share of the booking amount kept when a customer cancels.
    pub cancellation_fee_rate: Decimal,
    /// Share of the cancellation fee credited to the vendor; the platform keeps the rest.
    pub cancellation_fee_vendor_share: Decimal,
    /// Share of the booking amount earned by the vendor on approval.
    pub booking_vendor_share: Decimal,
    pub min_top_up: Money,
    pub max_top_up: Money,
    pub min_payout: Money,
    /// Minutes east of UTC of the marketplace's calendar. Booking dates are
    /// judged against this day.
    pub utc_offset_minutes: i16,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            cancellation_fee_rate: dec!(0.30),
            cancellation_fee_vendor_share: dec!(0.50),
            booking_vendor_share: dec!(0.50),
            min_top_up: Money::from(100),
            max_top_up: Money::from(100_000),
            min_payout: Money::from(100),
            utc_offset_minutes: 330,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationSplit {
    pub fee: Money,
    pub refund: Money,
    pub vendor_share: Money,
    pub platform_share: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingSplit {
    pub vendor_amount: Money,
    pub platform_amount: Money,
}

impl Policy {
    pub fn validate(&self) -> Result<(), PolicyError> {
        check_rate("cancellation_fee_rate", self.cancellation_fee_rate)?;
        check_rate("cancellation_fee_vendor_share", self.cancellation_fee_vendor_share)?;
        check_rate("booking_vendor_share", self.booking_vendor_share)?;
        if self.min_top_up > self.max_top_up {
            return Err(PolicyError::TopUpBounds {
                min: self.min_top_up,
                max: self.max_top_up,
            });
        }
        self.utc_offset()?;
        Ok(())
    }

    pub fn utc_offset(&self) -> Result<UtcOffset, PolicyError> {
        UtcOffset::from_whole_seconds(i32::from(self.utc_offset_minutes) * 60)
            .map_err(|_| PolicyError::UtcOffset(self.utc_offset_minutes))
    }

    /// The marketplace's calendar date at `at`.
    pub fn local_date(&self, at: OffsetDateTime) -> Date {
        match self.utc_offset() {
            Ok(offset) => at.to_offset(offset).date(),
            Err(_) => at.date(),
        }
    }

    pub fn today(&self) -> Date {
        self.local_date(OffsetDateTime::now_utc())
    }

    /// Splits a cancelled booking's amount. The remainders are computed by
    /// subtraction so the four parts always add back up to `total`.
    pub fn cancellation_split(&self, total: Money) -> CancellationSplit {
        let fee = total.portion(self.cancellation_fee_rate);
        let refund = total.saturating_sub(fee);
        let vendor_share = fee.portion(self.cancellation_fee_vendor_share);
        let platform_share = fee.saturating_sub(vendor_share);
        CancellationSplit {
            fee,
            refund,
            vendor_share,
            platform_share,
        }
    }

    pub fn booking_split(&self, total: Money) -> BookingSplit {
        let vendor_amount = total.portion(self.booking_vendor_share);
        BookingSplit {
            vendor_amount,
            platform_amount: total.saturating_sub(vendor_amount),
        }
    }
}

fn check_rate(name: &'static str, value: Decimal) -> Result<(), PolicyError> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(PolicyError::RateOutOfRange { name, value });
    }
    Ok(())
}
