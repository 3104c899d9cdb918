use crate::models::{MatchResult, Query};
use crate::services::http::{ExternalServiceError, RequestBody, RequestOptions, RetryClient};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use thiserror::Error;

/// Longest assisted explanation accepted, in characters
pub const MAX_EXPLANATION_CHARS: usize = 600;

const SYSTEM_PROMPT: &str = "You explain real-estate recommendations. Given a listing, \
the buyer's priorities and per-factor scores from 0 to 10, write two or three short \
sentences on why the listing fits and what the main compromise is. Use only the facts given.";

/// Errors that can occur when producing an assisted explanation
#[derive(Debug, Error)]
pub enum ExplainError {
    #[error("Explainer request failed: {0}")]
    Upstream(#[from] ExternalServiceError),

    #[error("Explainer returned no text")]
    EmptyOutput,

    #[error("Explainer output too long: {0} chars")]
    Overlong(usize),
}

/// Produces a natural-language explanation for a scored listing
#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(&self, result: &MatchResult, query: &Query) -> Result<String, ExplainError>;
}

/// Assisted explanation if it succeeds, otherwise the rule-based text already on the result
pub async fn explain_or_fallback(explainer: &dyn Explainer, result: &MatchResult, query: &Query) -> String {
    match explainer.explain(result, query).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Assisted explanation for {} failed, keeping rule-based text: {}", result.listing_id, e);
            result.explanation.clone()
        }
    }
}

/// OpenAI-compatible chat-completions explainer
pub struct ChatExplainer {
    client: RetryClient,
    endpoint: String,
    api_key: String,
    model: String,
    timeout: Duration,
}

impl ChatExplainer {
    pub fn new(client: RetryClient, endpoint: String, api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            client,
            endpoint,
            api_key,
            model,
            timeout,
        }
    }

    fn user_prompt(result: &MatchResult, query: &Query) -> String {
        let listing = &result.listing;
        let priorities = query
            .weighted_factors()
            .map(|factor| format!("{}={}", factor, query.weight(factor)))
            .collect::<Vec<_>>()
            .join(", ");
        let scores = result
            .breakdown
            .iter()
            .map(|(factor, score)| format!("{}={:.1}", factor, score))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "Listing: {}, {}. {} rooms, {} m², price {}.\nPriorities: {}\nScores: {}\nOverall: {:.1}/10",
            listing.title,
            listing.address,
            listing.rooms,
            listing.area,
            listing.price,
            priorities,
            scores,
            result.match_score
        )
    }

    fn validate(text: &str) -> Result<String, ExplainError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ExplainError::EmptyOutput);
        }
        let chars = text.chars().count();
        if chars > MAX_EXPLANATION_CHARS {
            return Err(ExplainError::Overlong(chars));
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl Explainer for ChatExplainer {
    async fn explain(&self, result: &MatchResult, query: &Query) -> Result<String, ExplainError> {
        let body = RequestBody::Json(json!({
            "model": self.model,
            "temperature": 0.3,
            "max_tokens": 300,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": Self::user_prompt(result, query)},
            ],
        }));
        let opts = RequestOptions::new().bearer(&self.api_key).timeout(self.timeout);

        let response: Value = self.client.post_json(&self.endpoint, &body, &opts).await?;
        let text = response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default();

        Self::validate(text)
    }
}
