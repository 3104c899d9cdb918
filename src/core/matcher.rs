use crate::core::{
    explain::explain,
    scoring::{calculate_match_score, score_listing, AbsentInput},
};
use crate::models::{EnrichmentRecord, Listing, MatchResult, Query};

/// Number of results handed back per search
pub const DEFAULT_TOP_N: usize = 10;

/// Result of ranking a candidate set
#[derive(Debug)]
pub struct RankedMatches {
    pub matches: Vec<MatchResult>,
    pub total_candidates: usize,
}

/// Scores and ranks already-fetched candidates against a query
///
/// # Pipeline Stages
/// 1. Per-factor breakdown
/// 2. Weighted average over the factors that were actually scored
/// 3. Rule-based explanation
/// 4. Stable sort by score, truncate to top N
#[derive(Debug, Clone)]
pub struct Matcher {
    absent_input: AbsentInput,
    top_n: usize,
}

impl Matcher {
    pub fn new(absent_input: AbsentInput, top_n: usize) -> Self {
        Self { absent_input, top_n }
    }

    pub fn with_defaults() -> Self {
        Self::new(AbsentInput::default(), DEFAULT_TOP_N)
    }

    /// Score one listing
    pub fn score(
        &self,
        listing: Listing,
        enrichment: Option<&EnrichmentRecord>,
        query: &Query,
    ) -> MatchResult {
        let breakdown = score_listing(&listing, enrichment, query, self.absent_input);
        let match_score = calculate_match_score(&query.weights, &breakdown);
        let explanation = explain(&breakdown);

        MatchResult {
            listing_id: listing.id(),
            listing,
            match_score,
            breakdown,
            explanation,
        }
    }

    /// Score every candidate and keep the best `top_n`
    ///
    /// Ties keep the order candidates were supplied in.
    pub fn rank(
        &self,
        query: &Query,
        candidates: Vec<(Listing, Option<EnrichmentRecord>)>,
    ) -> RankedMatches {
        let total_candidates = candidates.len();

        let mut matches: Vec<MatchResult> = candidates
            .into_iter()
            .map(|(listing, enrichment)| self.score(listing, enrichment.as_ref(), query))
            .collect();

        // sort_by is stable, equal scores stay in first-seen order
        matches.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));
        matches.truncate(self.top_n);

        RankedMatches {
            matches,
            total_candidates,
        }
    }
}

impl Default for Matcher {
    fn default() -> Self {
        Self::with_defaults()
    }
}
