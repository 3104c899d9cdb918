use super::{ListingProvider, ProviderError};
use crate::core::dedup::deduplicate;
use crate::models::{Listing, Query};
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

/// Fans a search out to every provider and merges the results
///
/// A failing provider only shrinks the candidate set. Merged results are
/// concatenated in provider order and then deduplicated.
pub struct AggregatingProvider {
    providers: Vec<Arc<dyn ListingProvider>>,
}

impl AggregatingProvider {
    pub fn new(providers: Vec<Arc<dyn ListingProvider>>) -> Self {
        Self { providers }
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait]
impl ListingProvider for AggregatingProvider {
    fn name(&self) -> &str {
        "aggregator"
    }

    async fn search(&self, query: &Query) -> Result<Vec<Listing>, ProviderError> {
        let results = join_all(self.providers.iter().map(|p| p.search(query))).await;

        let mut all = Vec::new();
        let mut failed = 0;
        for (provider, result) in self.providers.iter().zip(results) {
            match result {
                Ok(listings) => {
                    tracing::debug!("Provider {} returned {} listings", provider.name(), listings.len());
                    all.extend(listings);
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!("Provider {} failed, skipping: {}", provider.name(), e);
                }
            }
        }

        let fetched = all.len();
        let deduped = deduplicate(all);
        tracing::info!(
            providers = self.providers.len(),
            failed,
            fetched,
            unique = deduped.len(),
            "Aggregated listings"
        );

        Ok(deduped)
    }

    /// Accepts a bare provider id or a catalog id `provider:external_id`
    async fn get(&self, id: &str) -> Result<Option<Listing>, ProviderError> {
        if let Some((prefix, external_id)) = id.split_once(':') {
            if let Some(provider) = self.providers.iter().find(|p| p.name() == prefix) {
                return match provider.get(external_id).await {
                    Ok(found) => Ok(found),
                    Err(e) => {
                        tracing::warn!("Provider {} lookup of {} failed: {}", prefix, external_id, e);
                        Ok(None)
                    }
                };
            }
        }

        for provider in &self.providers {
            match provider.get(id).await {
                Ok(Some(listing)) => return Ok(Some(listing)),
                Ok(None) => {}
                Err(e) => tracing::warn!("Provider {} lookup of {} failed: {}", provider.name(), id, e),
            }
        }

        Ok(None)
    }
}
