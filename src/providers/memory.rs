use super::{generated_id, ListingProvider, ProviderError};
use crate::core::filters::matches_query;
use crate::models::{Listing, Query};
use async_trait::async_trait;

/// Fixed in-memory catalog
///
/// Applies the query's hard filters locally, which also makes it the
/// reference source for tests and offline runs.
pub struct MemoryProvider {
    name: String,
    listings: Vec<Listing>,
}

impl MemoryProvider {
    /// Catalog entries without an `external_id` get a generated one
    pub fn new(name: impl Into<String>, listings: Vec<Listing>) -> Self {
        let listings = listings
            .into_iter()
            .map(|mut listing| {
                if listing.external_id.is_empty() {
                    listing.external_id = generated_id(&listing);
                }
                listing
            })
            .collect();

        Self {
            name: name.into(),
            listings,
        }
    }
}

#[async_trait]
impl ListingProvider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &Query) -> Result<Vec<Listing>, ProviderError> {
        let parking_required = query.filters.parking_required;

        Ok(self
            .listings
            .iter()
            .filter(|listing| matches_query(listing, query))
            .filter(|listing| !parking_required || listing.has_parking)
            .cloned()
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<Listing>, ProviderError> {
        Ok(self
            .listings
            .iter()
            .find(|listing| listing.external_id == id || listing.id() == id)
            .cloned())
    }
}
