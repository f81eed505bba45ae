use std::{cmp::Ordering, collections::HashMap};

use homeserve_core::{
    ApprovalStatus, CategoryId, ListingFilter, ListingId, Money, ServiceCategory, ServiceListing, StorageError,
    VendorId, VendorProfile,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{optional, required, valid_pin_code, MarketResult, Marketplace};
use crate::error::MarketError;

const DEFAULT_PRICE_UNIT: &str = "per service";

#[derive(Debug, Clone, Deserialize)]
pub struct ListingInput {
    pub category_id: CategoryId,
    pub service_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub base_price: Money,
    #[serde(default)]
    pub price_unit: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub pin_code: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchSort {
    #[default]
    Rating,
    PriceLow,
    PriceHigh,
    Jobs,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub pin_code: Option<String>,
    pub min_price: Option<Money>,
    pub max_price: Option<Money>,
    pub min_rating: Option<Decimal>,
    pub sort: Option<SearchSort>,
}

/// An active listing together with the vendor facts shown in search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub listing: ServiceListing,
    pub business_name: String,
    pub vendor_rating: Decimal,
    pub jobs_completed: u32,
}

impl SearchQuery {
    fn matches(&self, listing: &ServiceListing, vendor: &VendorProfile) -> bool {
        if let Some(q) = self.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let q = q.to_lowercase();
            let haystacks = [
                Some(listing.service_name.as_str()),
                Some(listing.service_type.as_str()),
                Some(vendor.business_name.as_str()),
                listing.description.as_deref(),
                listing.location.as_deref(),
            ];
            if !haystacks
                .iter()
                .flatten()
                .any(|text| text.to_lowercase().contains(&q))
            {
                return false;
            }
        }
        if let Some(category) = self.category.as_deref().filter(|c| !c.is_empty()) {
            if !listing.service_type.eq_ignore_ascii_case(category) {
                return false;
            }
        }
        if let Some(pin) = self.pin_code.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
            if !listing.pin_code.as_deref().unwrap_or_default().contains(pin) {
                return false;
            }
        }
        if self.min_price.map_or(false, |min| listing.base_price < min) {
            return false;
        }
        if self.max_price.map_or(false, |max| listing.base_price > max) {
            return false;
        }
        if self.min_rating.map_or(false, |min| vendor.rating < min) {
            return false;
        }
        true
    }
}

fn compare(sort: SearchSort, a: &SearchResult, b: &SearchResult) -> Ordering {
    match sort {
        SearchSort::Rating => b.vendor_rating.cmp(&a.vendor_rating),
        SearchSort::PriceLow => a.listing.base_price.cmp(&b.listing.base_price),
        SearchSort::PriceHigh => b.listing.base_price.cmp(&a.listing.base_price),
        SearchSort::Jobs => b.jobs_completed.cmp(&a.jobs_completed),
    }
}

impl Marketplace {
    pub fn create_category(&self, name: &str, description: Option<String>) -> MarketResult<ServiceCategory> {
        let category = ServiceCategory {
            id: Uuid::new_v4(),
            name: required("category name", name)?,
            description: optional(description),
        };
        self.atomically("create_category", |storage| Ok(storage.insert_category(&category)?))?;
        tracing::info!(category_id = %category.id, name = %category.name, "Category created");
        Ok(category)
    }

    /// Creates the named categories that do not exist yet.
    pub fn seed_categories(&self, names: &[String]) -> MarketResult<usize> {
        let mut created = 0;
        for name in names {
            match self.create_category(name, None) {
                Ok(_) => created += 1,
                Err(MarketError::Storage(StorageError::AlreadyExists { .. })) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    pub fn list_categories(&self) -> MarketResult<Vec<ServiceCategory>> {
        self.read(|storage| Ok(storage.list_categories()?))
    }

    pub fn category_by_name(&self, name: &str) -> MarketResult<ServiceCategory> {
        self.list_categories()?
            .into_iter()
            .find(|c| c.name.eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| MarketError::NotFound {
                entity: "category",
                id: name.to_string(),
            })
    }

    pub fn create_listing(&self, vendor_id: VendorId, input: ListingInput) -> MarketResult<ServiceListing> {
        let listing = self.atomically("create_listing", |storage| {
            let vendor = storage.get_vendor(vendor_id)?;
            if !vendor.is_approved() {
                return Err(MarketError::forbidden(
                    "vendor must be approved by an admin before adding services",
                ));
            }
            let category = storage.get_category(input.category_id)?;
            let mut listing = ServiceListing {
                id: Uuid::new_v4(),
                vendor_id,
                category_id: category.id,
                service_type: category.name,
                service_name: String::new(),
                description: None,
                base_price: Money::ZERO,
                price_unit: String::new(),
                location: None,
                pin_code: None,
                is_active: true,
                created_at: OffsetDateTime::now_utc(),
            };
            apply_listing_input(&mut listing, &vendor, input)?;
            storage.insert_listing(&listing)?;
            Ok(listing)
        })?;
        tracing::info!(listing_id = %listing.id, vendor_id = %vendor_id, price = %listing.base_price, "Listing created");
        Ok(listing)
    }

    pub fn update_listing(
        &self,
        vendor_id: VendorId,
        listing_id: ListingId,
        input: ListingInput,
    ) -> MarketResult<ServiceListing> {
        self.atomically("update_listing", |storage| {
            let mut listing = owned_listing(storage.get_listing(listing_id)?, vendor_id)?;
            let vendor = storage.get_vendor(vendor_id)?;
            let category = storage.get_category(input.category_id)?;
            listing.category_id = category.id;
            listing.service_type = category.name;
            apply_listing_input(&mut listing, &vendor, input)?;
            storage.update_listing(&listing)?;
            Ok(listing)
        })
    }

    pub fn delete_listing(&self, vendor_id: VendorId, listing_id: ListingId) -> MarketResult<()> {
        self.atomically("delete_listing", |storage| {
            owned_listing(storage.get_listing(listing_id)?, vendor_id)?;
            Ok(storage.delete_listing(listing_id)?)
        })?;
        tracing::info!(listing_id = %listing_id, vendor_id = %vendor_id, "Listing deleted");
        Ok(())
    }

    /// Flips the listing between active and hidden.
    pub fn toggle_listing(&self, vendor_id: VendorId, listing_id: ListingId) -> MarketResult<ServiceListing> {
        self.atomically("toggle_listing", |storage| {
            let mut listing = owned_listing(storage.get_listing(listing_id)?, vendor_id)?;
            listing.is_active = !listing.is_active;
            storage.update_listing(&listing)?;
            Ok(listing)
        })
    }

    pub fn list_vendor_listings(&self, vendor_id: VendorId) -> MarketResult<Vec<ServiceListing>> {
        self.read(|storage| {
            storage.get_vendor(vendor_id)?;
            Ok(storage.list_listings(&ListingFilter {
                vendor_id: Some(vendor_id),
                ..ListingFilter::default()
            })?)
        })
    }

    /// Searches active listings of approved vendors.
    pub fn search(&self, query: &SearchQuery) -> MarketResult<Vec<SearchResult>> {
        let (vendors, listings) = self.read(|storage| {
            let vendors: HashMap<VendorId, VendorProfile> = storage
                .list_vendors(Some(ApprovalStatus::Approved))?
                .into_iter()
                .map(|v| (v.id, v))
                .collect();
            let listings = storage.list_listings(&ListingFilter {
                active_only: true,
                ..ListingFilter::default()
            })?;
            Ok((vendors, listings))
        })?;

        let mut results: Vec<SearchResult> = listings
            .into_iter()
            .filter_map(|listing| {
                let vendor = vendors.get(&listing.vendor_id)?;
                query.matches(&listing, vendor).then(|| SearchResult {
                    business_name: vendor.business_name.clone(),
                    vendor_rating: vendor.rating,
                    jobs_completed: vendor.jobs_completed,
                    listing,
                })
            })
            .collect();

        let sort = query.sort.unwrap_or_default();
        results.sort_by(|a, b| compare(sort, a, b));
        Ok(results)
    }

    pub fn listings_in_category(&self, name: &str) -> MarketResult<Vec<SearchResult>> {
        let category = self.category_by_name(name)?;
        self.search(&SearchQuery {
            category: Some(category.name),
            ..SearchQuery::default()
        })
    }
}

fn owned_listing(listing: ServiceListing, vendor_id: VendorId) -> MarketResult<ServiceListing> {
    if listing.vendor_id != vendor_id {
        return Err(MarketError::forbidden("listing belongs to another vendor"));
    }
    Ok(listing)
}

/// Copies validated input onto a listing. Location and pin code fall back to
/// the vendor's service area, then to the vendor's own address.
fn apply_listing_input(listing: &mut ServiceListing, vendor: &VendorProfile, input: ListingInput) -> MarketResult<()> {
    if input.base_price.is_zero() {
        return Err(MarketError::validation("base price must be greater than zero"));
    }
    let pin_code = match optional(input.pin_code) {
        Some(pin) => Some(valid_pin_code(&pin)?),
        None => vendor.service_pin_code.clone().or_else(|| vendor.pin_code.clone()),
    };

    listing.service_name = required("service name", &input.service_name)?;
    listing.description = optional(input.description);
    listing.base_price = input.base_price;
    listing.price_unit = optional(input.price_unit).unwrap_or_else(|| DEFAULT_PRICE_UNIT.to_string());
    listing.location = optional(input.location)
        .or_else(|| vendor.service_location.clone())
        .or_else(|| vendor.location.clone());
    listing.pin_code = pin_code;
    Ok(())
}
