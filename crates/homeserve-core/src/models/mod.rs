use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::money::Money;

pub mod read;
pub mod write;

pub type UserId = Uuid;
pub type VendorId = Uuid;
pub type AdminId = Uuid;
pub type CategoryId = Uuid;
pub type ListingId = Uuid;
pub type BookingId = Uuid;
pub type PayoutId = Uuid;
pub type PaymentMethodId = Uuid;

/// Last onboarding step; profiles at this step are fully onboarded.
pub const ONBOARDING_COMPLETE: u8 = 4;

/// Declares a snake_case string enum with `as_str`, `FromStr` and `Display`,
/// used for status columns in storage and in JSON.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} value: {}", stringify!($name), other)),
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(
    ApprovalStatus {
        Draft => "draft",
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
);

string_enum!(
    BookingStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Completed => "completed",
        Cancelled => "cancelled",
    }
);

string_enum!(
    PaymentStatus {
        Paid => "paid",
        Refunded => "refunded",
        PartiallyRefunded => "partially_refunded",
    }
);

string_enum!(
    TransactionType {
        Recharge => "recharge",
        Debit => "debit",
        Refund => "refund",
    }
);

string_enum!(
    TransactionStatus {
        Completed => "completed",
    }
);

string_enum!(
    EarningType {
        Booking => "booking",
        CancellationFee => "cancellation_fee",
    }
);

string_enum!(
    EarningStatus {
        Pending => "pending",
        Available => "available",
        Reversed => "reversed",
    }
);

string_enum!(
    PayoutStatus {
        Pending => "pending",
        Processing => "processing",
        Completed => "completed",
        Rejected => "rejected",
    }
);

string_enum!(
    PaymentMethodType {
        Card => "card",
        Upi => "upi",
    }
);

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BankDetails {
    #[serde(default)]
    pub bank_name: String,
    pub account_number: String,
    pub ifsc_code: String,
    pub account_holder_name: String,
}

impl BankDetails {
    /// A payout needs an account number, an IFSC code and a holder name.
    pub fn is_complete(&self) -> bool {
        !self.account_number.trim().is_empty()
            && !self.ifsc_code.trim().is_empty()
            && !self.account_holder_name.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPreferences {
    pub email_notifications: bool,
    pub sms_notifications: bool,
    pub push_notifications: bool,
    pub booking_updates: bool,
    pub promotional_offers: bool,
    pub service_reminders: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            email_notifications: true,
            sms_notifications: true,
            push_notifications: true,
            booking_updates: true,
            promotional_offers: false,
            service_reminders: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserDocuments {
    pub aadhar_card_url: Option<String>,
    pub pan_card_url: Option<String>,
    pub signature_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VendorDocuments {
    pub aadhar_card_url: Option<String>,
    pub pan_card_url: Option<String>,
    pub gst_certificate_url: Option<String>,
    pub id_proof_url: Option<String>,
    pub address_proof_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub address: Option<String>,
    pub pin_code: Option<String>,
    pub profile_image_url: Option<String>,
    pub documents: UserDocuments,
    pub bank: Option<BankDetails>,
    pub upi_id: Option<String>,
    pub onboarding_step: u8,
    pub notification_preferences: NotificationPreferences,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorProfile {
    pub id: VendorId,
    pub business_name: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub phone: String,
    pub location: Option<String>,
    pub pin_code: Option<String>,
    pub category_id: Option<CategoryId>,
    pub profile_image_url: Option<String>,
    pub documents: VendorDocuments,
    pub service_location: Option<String>,
    pub service_pin_code: Option<String>,
    pub bank: Option<BankDetails>,
    pub onboarding_step: u8,
    pub approval_status: ApprovalStatus,
    /// Mean review rating, one decimal place; zero until the first review.
    pub rating: rust_decimal::Decimal,
    pub jobs_completed: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl VendorProfile {
    pub fn is_approved(&self) -> bool {
        self.approval_status == ApprovalStatus::Approved
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminProfile {
    pub id: AdminId,
    pub full_name: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCategory {
    pub id: CategoryId,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceListing {
    pub id: ListingId,
    pub vendor_id: VendorId,
    pub category_id: CategoryId,
    /// Category name at the time of listing, kept for search.
    pub service_type: String,
    pub service_name: String,
    pub description: Option<String>,
    pub base_price: Money,
    pub price_unit: String,
    pub location: Option<String>,
    pub pin_code: Option<String>,
    pub is_active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A saved card or UPI handle. Only the last four digits of a card are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: PaymentMethodId,
    pub user_id: UserId,
    pub method_type: PaymentMethodType,
    pub display_name: String,
    pub card_last4: Option<String>,
    pub upi_id: Option<String>,
    pub is_default: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user_id: UserId,
    pub vendor_id: VendorId,
    pub listing_id: ListingId,
    pub service_name: String,
    pub booking_date: Date,
    pub time_slot: String,
    pub total_amount: Money,
    pub vendor_amount: Option<Money>,
    pub company_amount: Option<Money>,
    pub user_address: String,
    pub user_pin_code: String,
    pub notes: Option<String>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub balance_before: Money,
    pub balance_after: Money,
    pub description: String,
    pub payment_method: Option<String>,
    pub reference_id: String,
    pub status: TransactionStatus,
    pub journal_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorEarning {
    pub id: Uuid,
    pub vendor_id: VendorId,
    pub booking_id: BookingId,
    pub total_amount: Money,
    pub vendor_amount: Money,
    pub company_amount: Money,
    pub earning_type: EarningType,
    pub status: EarningStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub id: PayoutId,
    pub vendor_id: VendorId,
    pub amount: Money,
    pub status: PayoutStatus,
    pub bank: BankDetails,
    #[serde(with = "time::serde::rfc3339")]
    pub requested_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub reason: String,
    pub cancellation_fee: Money,
    pub refund_amount: Money,
    pub vendor_share: Money,
    pub platform_share: Money,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceReview {
    pub id: Uuid,
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub vendor_id: VendorId,
    pub rating: u8,
    pub comment: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub operation: String,
    pub reference_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_enums_round_trip_through_storage_text() {
        for status in [
            BookingStatus::Pending,
            BookingStatus::Confirmed,
            BookingStatus::Completed,
            BookingStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<BookingStatus>(), Ok(status));
        }
        assert_eq!(PaymentStatus::PartiallyRefunded.as_str(), "partially_refunded");
        assert!("shipped".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn string_enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&EarningType::CancellationFee).unwrap(),
            "\"cancellation_fee\""
        );
    }

    #[test]
    fn bank_details_need_number_ifsc_and_holder() {
        let mut bank = BankDetails {
            bank_name: String::new(),
            account_number: "0012345".to_string(),
            ifsc_code: "HDFC0001".to_string(),
            account_holder_name: "A. Kumar".to_string(),
        };
        assert!(bank.is_complete());
        bank.ifsc_code = "  ".to_string();
        assert!(!bank.is_complete());
    }
}
