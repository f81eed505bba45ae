use homeserve_core::{
    ledger, BankDetails, NotificationPreferences, UserDocuments, UserId, UserProfile, ONBOARDING_COMPLETE,
};
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{optional, required, valid_email, valid_pin_code, MarketResult, Marketplace};
use crate::error::MarketError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserAddress {
    pub address: String,
    pub pin_code: String,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserBank {
    #[serde(default)]
    pub bank: Option<BankDetails>,
    #[serde(default)]
    pub upi_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub pin_code: Option<String>,
    pub profile_image_url: Option<String>,
}

impl Marketplace {
    pub fn register_user(&self, input: NewUser) -> MarketResult<UserProfile> {
        let user = UserProfile {
            id: Uuid::new_v4(),
            full_name: required("full name", &input.full_name)?,
            email: valid_email(&input.email)?,
            phone: required("phone", &input.phone)?,
            address: None,
            pin_code: None,
            profile_image_url: None,
            documents: UserDocuments::default(),
            bank: None,
            upi_id: None,
            onboarding_step: 1,
            notification_preferences: NotificationPreferences::default(),
            created_at: OffsetDateTime::now_utc(),
        };

        self.atomically("register_user", |storage| {
            storage.insert_user(&user)?;
            storage.ensure_account(&ledger::user_wallet(user.id))?;
            Ok(())
        })?;
        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    pub fn get_user(&self, user_id: UserId) -> MarketResult<UserProfile> {
        self.read(|storage| Ok(storage.get_user(user_id)?))
    }

    pub fn submit_user_address(&self, user_id: UserId, input: UserAddress) -> MarketResult<UserProfile> {
        let address = required("address", &input.address)?;
        let pin_code = valid_pin_code(&input.pin_code)?;
        self.modify_user(user_id, "user_onboarding_address", |user| {
            user.address = Some(address);
            user.pin_code = Some(pin_code);
            if let Some(url) = optional(input.profile_image_url) {
                user.profile_image_url = Some(url);
            }
            user.onboarding_step = user.onboarding_step.max(2);
            Ok(())
        })
    }

    pub fn submit_user_documents(&self, user_id: UserId, documents: UserDocuments) -> MarketResult<UserProfile> {
        let documents = UserDocuments {
            aadhar_card_url: optional(documents.aadhar_card_url),
            pan_card_url: optional(documents.pan_card_url),
            signature_url: optional(documents.signature_url),
        };
        if documents.aadhar_card_url.is_none() || documents.pan_card_url.is_none() {
            return Err(MarketError::validation("aadhar and pan documents are required"));
        }
        self.modify_user(user_id, "user_onboarding_documents", |user| {
            if user.onboarding_step < 2 {
                return Err(MarketError::validation("address must be submitted before documents"));
            }
            user.documents = documents;
            user.onboarding_step = user.onboarding_step.max(3);
            Ok(())
        })
    }

    pub fn submit_user_bank(&self, user_id: UserId, input: UserBank) -> MarketResult<UserProfile> {
        let upi_id = optional(input.upi_id);
        if let Some(bank) = &input.bank {
            if !bank.is_complete() {
                return Err(MarketError::validation(
                    "bank details need account number, IFSC code and account holder name",
                ));
            }
        }
        if input.bank.is_none() && upi_id.is_none() {
            return Err(MarketError::validation("bank details or a UPI id is required"));
        }
        self.modify_user(user_id, "user_onboarding_bank", |user| {
            if user.onboarding_step < 3 {
                return Err(MarketError::validation("documents must be submitted before bank details"));
            }
            user.bank = input.bank;
            user.upi_id = upi_id;
            user.onboarding_step = ONBOARDING_COMPLETE;
            Ok(())
        })
    }

    pub fn update_user_profile(&self, user_id: UserId, input: UserUpdate) -> MarketResult<UserProfile> {
        let pin_code = match optional(input.pin_code) {
            Some(pin) => Some(valid_pin_code(&pin)?),
            None => None,
        };
        self.modify_user(user_id, "update_user_profile", |user| {
            if let Some(name) = optional(input.full_name) {
                user.full_name = name;
            }
            if let Some(phone) = optional(input.phone) {
                user.phone = phone;
            }
            if let Some(address) = optional(input.address) {
                user.address = Some(address);
            }
            if pin_code.is_some() {
                user.pin_code = pin_code;
            }
            if let Some(url) = optional(input.profile_image_url) {
                user.profile_image_url = Some(url);
            }
            Ok(())
        })
    }

    pub fn update_notification_preferences(
        &self,
        user_id: UserId,
        preferences: NotificationPreferences,
    ) -> MarketResult<UserProfile> {
        self.modify_user(user_id, "update_notification_preferences", |user| {
            user.notification_preferences = preferences;
            Ok(())
        })
    }

    fn modify_user(
        &self,
        user_id: UserId,
        event: &'static str,
        f: impl FnOnce(&mut UserProfile) -> MarketResult<()>,
    ) -> MarketResult<UserProfile> {
        let user = self.atomically(event, |storage| {
            let mut user = storage.get_user(user_id)?;
            f(&mut user)?;
            storage.update_user(&user)?;
            Ok(user)
        })?;
        tracing::info!(user_id = %user.id, step = user.onboarding_step, event, "User profile updated");
        Ok(user)
    }
}
