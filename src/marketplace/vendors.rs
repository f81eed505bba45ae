use homeserve_core::{
    ledger, AdminProfile, ApprovalStatus, BankDetails, CategoryId, StorageBackend, VendorDocuments, VendorId,
    VendorProfile, ONBOARDING_COMPLETE,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{optional, required, valid_email, valid_pin_code, MarketResult, Marketplace};
use crate::error::MarketError;

#[derive(Debug, Clone, Deserialize)]
pub struct NewVendor {
    pub business_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VendorDetails {
    pub first_name: String,
    pub last_name: String,
    pub location: String,
    pub pin_code: String,
    pub category_id: CategoryId,
    #[serde(default)]
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VendorDocumentsInput {
    pub aadhar_card_url: String,
    pub pan_card_url: String,
    #[serde(default)]
    pub gst_certificate_url: Option<String>,
    pub service_location: String,
    pub service_pin_code: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VendorUpdate {
    pub business_name: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub pin_code: Option<String>,
    pub profile_image_url: Option<String>,
    pub id_proof_url: Option<String>,
    pub address_proof_url: Option<String>,
    pub bank: Option<BankDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewAdmin {
    pub full_name: String,
    pub email: String,
}

fn complete_bank(bank: BankDetails) -> MarketResult<BankDetails> {
    if !bank.is_complete() {
        return Err(MarketError::validation(
            "bank details need account number, IFSC code and account holder name",
        ));
    }
    Ok(bank)
}

impl Marketplace {
    pub fn register_vendor(&self, input: NewVendor) -> MarketResult<VendorProfile> {
        let vendor = VendorProfile {
            id: Uuid::new_v4(),
            business_name: required("business name", &input.business_name)?,
            first_name: None,
            last_name: None,
            email: valid_email(&input.email)?,
            phone: required("phone", &input.phone)?,
            location: None,
            pin_code: None,
            category_id: None,
            profile_image_url: None,
            documents: VendorDocuments::default(),
            service_location: None,
            service_pin_code: None,
            bank: None,
            onboarding_step: 1,
            approval_status: ApprovalStatus::Draft,
            rating: Decimal::ZERO,
            jobs_completed: 0,
            created_at: OffsetDateTime::now_utc(),
        };

        self.atomically("register_vendor", |storage| {
            storage.insert_vendor(&vendor)?;
            storage.ensure_account(&ledger::vendor_pending(vendor.id))?;
            storage.ensure_account(&ledger::vendor_available(vendor.id))?;
            Ok(())
        })?;
        tracing::info!(vendor_id = %vendor.id, "Vendor registered");
        Ok(vendor)
    }

    pub fn get_vendor(&self, vendor_id: VendorId) -> MarketResult<VendorProfile> {
        self.read(|storage| Ok(storage.get_vendor(vendor_id)?))
    }

    pub fn submit_vendor_details(&self, vendor_id: VendorId, input: VendorDetails) -> MarketResult<VendorProfile> {
        let first_name = required("first name", &input.first_name)?;
        let last_name = required("last name", &input.last_name)?;
        let location = required("location", &input.location)?;
        let pin_code = valid_pin_code(&input.pin_code)?;
        self.modify_vendor(vendor_id, "vendor_onboarding_details", |storage, vendor| {
            storage.get_category(input.category_id)?;
            vendor.first_name = Some(first_name);
            vendor.last_name = Some(last_name);
            vendor.location = Some(location);
            vendor.pin_code = Some(pin_code);
            vendor.category_id = Some(input.category_id);
            if let Some(url) = optional(input.profile_image_url) {
                vendor.profile_image_url = Some(url);
            }
            vendor.onboarding_step = vendor.onboarding_step.max(2);
            Ok(())
        })
    }

    pub fn submit_vendor_documents(
        &self,
        vendor_id: VendorId,
        input: VendorDocumentsInput,
    ) -> MarketResult<VendorProfile> {
        let aadhar = required("aadhar card", &input.aadhar_card_url)?;
        let pan = required("pan card", &input.pan_card_url)?;
        let service_location = required("service location", &input.service_location)?;
        let service_pin_code = valid_pin_code(&input.service_pin_code)?;
        self.modify_vendor(vendor_id, "vendor_onboarding_documents", |_, vendor| {
            if vendor.onboarding_step < 2 {
                return Err(MarketError::validation("details must be submitted before documents"));
            }
            vendor.documents.aadhar_card_url = Some(aadhar);
            vendor.documents.pan_card_url = Some(pan);
            vendor.documents.gst_certificate_url = optional(input.gst_certificate_url);
            vendor.service_location = Some(service_location);
            vendor.service_pin_code = Some(service_pin_code);
            vendor.onboarding_step = vendor.onboarding_step.max(3);
            Ok(())
        })
    }

    /// Final onboarding step. Submits the vendor for admin review unless it
    /// is already approved.
    pub fn submit_vendor_bank(&self, vendor_id: VendorId, bank: BankDetails) -> MarketResult<VendorProfile> {
        let bank = complete_bank(bank)?;
        self.modify_vendor(vendor_id, "vendor_onboarding_bank", |_, vendor| {
            if vendor.onboarding_step < 3 {
                return Err(MarketError::validation("documents must be submitted before bank details"));
            }
            vendor.bank = Some(bank);
            vendor.onboarding_step = ONBOARDING_COMPLETE;
            if vendor.approval_status != ApprovalStatus::Approved {
                vendor.approval_status = ApprovalStatus::Pending;
            }
            Ok(())
        })
    }

    pub fn update_vendor_profile(&self, vendor_id: VendorId, input: VendorUpdate) -> MarketResult<VendorProfile> {
        let pin_code = match optional(input.pin_code) {
            Some(pin) => Some(valid_pin_code(&pin)?),
            None => None,
        };
        let bank = input.bank.map(complete_bank).transpose()?;
        self.modify_vendor(vendor_id, "update_vendor_profile", |_, vendor| {
            if let Some(name) = optional(input.business_name) {
                vendor.business_name = name;
            }
            if let Some(phone) = optional(input.phone) {
                vendor.phone = phone;
            }
            if let Some(location) = optional(input.location) {
                vendor.location = Some(location);
            }
            if pin_code.is_some() {
                vendor.pin_code = pin_code;
            }
            if let Some(url) = optional(input.profile_image_url) {
                vendor.profile_image_url = Some(url);
            }
            if let Some(url) = optional(input.id_proof_url) {
                vendor.documents.id_proof_url = Some(url);
            }
            if let Some(url) = optional(input.address_proof_url) {
                vendor.documents.address_proof_url = Some(url);
            }
            if bank.is_some() {
                vendor.bank = bank;
            }
            Ok(())
        })
    }

    pub fn register_admin(&self, input: NewAdmin) -> MarketResult<AdminProfile> {
        let admin = AdminProfile {
            id: Uuid::new_v4(),
            full_name: required("full name", &input.full_name)?,
            email: valid_email(&input.email)?,
            created_at: OffsetDateTime::now_utc(),
        };
        self.atomically("register_admin", |storage| Ok(storage.insert_admin(&admin)?))?;
        tracing::info!(admin_id = %admin.id, "Admin registered");
        Ok(admin)
    }

    fn modify_vendor(
        &self,
        vendor_id: VendorId,
        event: &'static str,
        f: impl FnOnce(&dyn StorageBackend, &mut VendorProfile) -> MarketResult<()>,
    ) -> MarketResult<VendorProfile> {
        let vendor = self.atomically(event, |storage| {
            let mut vendor = storage.get_vendor(vendor_id)?;
            f(storage, &mut vendor)?;
            storage.update_vendor(&vendor)?;
            Ok(vendor)
        })?;
        tracing::info!(
            vendor_id = %vendor.id,
            step = vendor.onboarding_step,
            status = %vendor.approval_status,
            event,
            "Vendor profile updated"
        );
        Ok(vendor)
    }
}
