use homeserve_core::{PaymentMethod, PaymentMethodId, PaymentMethodType, UserId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{optional, required, MarketResult, Marketplace};
use crate::error::MarketError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewPaymentMethod {
    pub method_type: PaymentMethodType,
    pub display_name: String,
    /// Full card number; only its last four digits are stored.
    #[serde(default)]
    pub card_number: Option<String>,
    #[serde(default)]
    pub upi_id: Option<String>,
}

/// A saved payment method with its owner's name and email, for the admin list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnedPaymentMethod {
    #[serde(flatten)]
    pub method: PaymentMethod,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

fn card_last4(card_number: Option<String>) -> MarketResult<String> {
    let digits: String = optional(card_number)
        .ok_or_else(|| MarketError::validation("card number is required"))?
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if !(12..=19).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(MarketError::validation("card number must be 12 to 19 digits"));
    }
    Ok(digits[digits.len() - 4..].to_string())
}

fn valid_upi_id(upi_id: Option<String>) -> MarketResult<String> {
    let upi_id = optional(upi_id).ok_or_else(|| MarketError::validation("UPI ID is required"))?;
    match upi_id.split_once('@') {
        Some((handle, provider)) if !handle.is_empty() && !provider.is_empty() && !provider.contains('@') => {
            Ok(upi_id)
        }
        _ => Err(MarketError::validation(format!("invalid UPI ID '{upi_id}'"))),
    }
}

impl Marketplace {
    /// Saves a card or UPI handle. A user's first method becomes the default.
    pub fn add_payment_method(&self, user_id: UserId, input: NewPaymentMethod) -> MarketResult<PaymentMethod> {
        let display_name = required("display name", &input.display_name)?;
        let (card_last4, upi_id) = match input.method_type {
            PaymentMethodType::Card => (Some(card_last4(input.card_number)?), None),
            PaymentMethodType::Upi => (None, Some(valid_upi_id(input.upi_id)?)),
        };

        let method = self.atomically("add_payment_method", |storage| {
            storage.get_user(user_id)?;
            let method = PaymentMethod {
                id: Uuid::new_v4(),
                user_id,
                method_type: input.method_type,
                display_name,
                card_last4,
                upi_id,
                is_default: storage.list_payment_methods(Some(user_id))?.is_empty(),
                created_at: OffsetDateTime::now_utc(),
            };
            storage.insert_payment_method(&method)?;
            Ok(method)
        })?;
        tracing::info!(
            user_id = %user_id,
            payment_method_id = %method.id,
            method_type = %method.method_type,
            "Payment method added"
        );
        Ok(method)
    }

    /// Newest first.
    pub fn list_payment_methods(&self, user_id: UserId) -> MarketResult<Vec<PaymentMethod>> {
        self.read(|storage| {
            storage.get_user(user_id)?;
            Ok(storage.list_payment_methods(Some(user_id))?)
        })
    }

    /// Removes one of the user's methods. When the default goes, the newest
    /// remaining method takes its place.
    pub fn delete_payment_method(&self, user_id: UserId, method_id: PaymentMethodId) -> MarketResult<()> {
        self.atomically("delete_payment_method", |storage| {
            let method = storage.get_payment_method(method_id)?;
            if method.user_id != user_id {
                return Err(MarketError::forbidden("payment method belongs to another user"));
            }
            storage.delete_payment_method(method_id)?;
            if method.is_default {
                if let Some(mut next) = storage.list_payment_methods(Some(user_id))?.into_iter().next() {
                    next.is_default = true;
                    storage.update_payment_method(&next)?;
                }
            }
            Ok(())
        })?;
        tracing::info!(user_id = %user_id, payment_method_id = %method_id, "Payment method removed");
        Ok(())
    }

    /// Every saved method, newest first, with the owner's name and email.
    pub fn all_payment_methods(&self) -> MarketResult<Vec<OwnedPaymentMethod>> {
        self.read(|storage| {
            let users = storage.list_users()?;
            Ok(storage
                .list_payment_methods(None)?
                .into_iter()
                .map(|method| {
                    let owner = users.iter().find(|u| u.id == method.user_id);
                    OwnedPaymentMethod {
                        user_name: owner.map(|u| u.full_name.clone()),
                        user_email: owner.map(|u| u.email.clone()),
                        method,
                    }
                })
                .collect())
        })
    }
}
