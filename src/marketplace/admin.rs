use homeserve_core::{
    ledger, AdminProfile, AdminStats, ApprovalStatus, Booking, BookingFilter, ListingFilter, PayoutRequest,
    ServiceListing, ServiceReview, TrialBalance, TrialBalanceItem, UserProfile, VendorId, VendorProfile,
    WalletTransaction,
};

use super::{MarketResult, Marketplace};
use crate::error::MarketError;

impl Marketplace {
    pub fn stats(&self) -> MarketResult<AdminStats> {
        self.read(|storage| {
            let vendors = storage.list_vendors(None)?;
            Ok(AdminStats {
                users: storage.list_users()?.len(),
                pending_vendors: vendors
                    .iter()
                    .filter(|v| v.approval_status == ApprovalStatus::Pending)
                    .count(),
                vendors: vendors.len(),
                admins: storage.list_admins()?.len(),
                bookings: storage.list_bookings(&BookingFilter::default())?.len(),
                listings: storage.list_listings(&ListingFilter::default())?.len(),
                platform_revenue: storage.get_balance(ledger::REVENUE)?,
                escrow_balance: storage.get_balance(ledger::ESCROW)?,
            })
        })
    }

    pub fn pending_vendors(&self) -> MarketResult<Vec<VendorProfile>> {
        self.read(|storage| Ok(storage.list_vendors(Some(ApprovalStatus::Pending))?))
    }

    pub fn approve_vendor(&self, vendor_id: VendorId) -> MarketResult<VendorProfile> {
        self.review_vendor(vendor_id, ApprovalStatus::Approved, "approve")
    }

    pub fn reject_vendor(&self, vendor_id: VendorId) -> MarketResult<VendorProfile> {
        self.review_vendor(vendor_id, ApprovalStatus::Rejected, "reject")
    }

    fn review_vendor(
        &self,
        vendor_id: VendorId,
        decision: ApprovalStatus,
        action: &'static str,
    ) -> MarketResult<VendorProfile> {
        let vendor = self.atomically("review_vendor", |storage| {
            let mut vendor = storage.get_vendor(vendor_id)?;
            if vendor.approval_status != ApprovalStatus::Pending {
                return Err(MarketError::transition("vendor", vendor.approval_status, action));
            }
            vendor.approval_status = decision;
            storage.update_vendor(&vendor)?;
            Ok(vendor)
        })?;
        tracing::info!(vendor_id = %vendor_id, status = %decision, "Vendor reviewed");
        Ok(vendor)
    }

    pub fn all_users(&self) -> MarketResult<Vec<UserProfile>> {
        self.read(|storage| Ok(storage.list_users()?))
    }

    pub fn all_vendors(&self) -> MarketResult<Vec<VendorProfile>> {
        self.read(|storage| Ok(storage.list_vendors(None)?))
    }

    pub fn all_admins(&self) -> MarketResult<Vec<AdminProfile>> {
        self.read(|storage| Ok(storage.list_admins()?))
    }

    pub fn all_bookings(&self) -> MarketResult<Vec<Booking>> {
        self.read(|storage| Ok(storage.list_bookings(&BookingFilter::default())?))
    }

    pub fn all_wallet_transactions(&self) -> MarketResult<Vec<WalletTransaction>> {
        self.read(|storage| Ok(storage.list_wallet_transactions(None)?))
    }

    pub fn all_listings(&self) -> MarketResult<Vec<ServiceListing>> {
        self.read(|storage| Ok(storage.list_listings(&ListingFilter::default())?))
    }

    pub fn all_reviews(&self) -> MarketResult<Vec<ServiceReview>> {
        self.read(|storage| Ok(storage.list_reviews(None)?))
    }

    pub fn all_payouts(&self) -> MarketResult<Vec<PayoutRequest>> {
        self.read(|storage| Ok(storage.list_payouts(None)?))
    }

    /// Every ledger account with its balance. Balanced whenever each journal was.
    pub fn trial_balance(&self) -> MarketResult<TrialBalance> {
        let items = self.read(|storage| {
            storage
                .list_accounts()?
                .into_iter()
                .map(|account| {
                    Ok(TrialBalanceItem {
                        balance: storage.get_balance(&account.id)?,
                        account_id: account.id,
                        account_type: account.account_type,
                    })
                })
                .collect::<MarketResult<Vec<_>>>()
        })?;
        Ok(TrialBalance::from_items(items))
    }
}
