//! External inference adapters.
//!
//! Every adapter absorbs its own failures: callers only ever see a [`ProviderOutcome`], never an
//! error, and `into_option()` is the "result or nothing" view the merge step consumes.

pub mod ner;
pub mod rewrite;
pub mod schema;
pub mod zero_shot;

use crate::product::AnalyzedProduct;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use schema::RewriteOutput;

pub const MIN_PROVIDER_TIMEOUT: Duration = Duration::from_secs(3);
pub const MAX_PROVIDER_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Ner,
    ZeroShot,
    Deepseek,
    Openai,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Ner => "ner",
            Provider::ZeroShot => "zero_shot",
            Provider::Deepseek => "deepseek",
            Provider::Openai => "openai",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("provider timed out")]
    Timeout,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(err.to_string())
        }
    }
}

/// Tagged result of one adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome<T> {
    Ok(T),
    Invalid(String),
    Unavailable(String),
    TimedOut,
}

impl<T> ProviderOutcome<T> {
    pub fn into_option(self) -> Option<T> {
        match self {
            ProviderOutcome::Ok(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ProviderOutcome::Ok(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProviderOutcome::Ok(_) => "ok",
            ProviderOutcome::Invalid(_) => "invalid",
            ProviderOutcome::Unavailable(_) => "unavailable",
            ProviderOutcome::TimedOut => "timed_out",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            ProviderOutcome::Invalid(reason) | ProviderOutcome::Unavailable(reason) => {
                Some(reason)
            }
            _ => None,
        }
    }
}

impl<T> From<Result<T, ProviderError>> for ProviderOutcome<T> {
    fn from(result: Result<T, ProviderError>) -> Self {
        match result {
            Ok(value) => ProviderOutcome::Ok(value),
            Err(ProviderError::Timeout) => ProviderOutcome::TimedOut,
            Err(ProviderError::InvalidResponse(reason)) => ProviderOutcome::Invalid(reason),
            Err(err @ ProviderError::Http(_)) | Err(err @ ProviderError::Unavailable(_)) => {
                ProviderOutcome::Unavailable(err.to_string())
            }
        }
    }
}

/// One grouped named entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Entity {
    pub group: String,
    pub word: String,
    pub score: f32,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredSentence {
    pub sentence: String,
    pub score: f32,
}

/// Label to sentences ranked by descending score.
pub type LabelRanking = BTreeMap<String, Vec<ScoredSentence>>;

/// Everything a rewrite model is given.
#[derive(Debug, Clone)]
pub struct RewriteRequest {
    pub text: String,
    pub baseline: AnalyzedProduct,
    pub weak_fields: Vec<&'static str>,
    pub images: Vec<String>,
}

#[async_trait]
pub trait EntityRecognizer: Send + Sync {
    fn is_configured(&self) -> bool;
    async fn recognize(&self, text: &str, budget: Duration) -> ProviderOutcome<Vec<Entity>>;
}

#[async_trait]
pub trait SentenceClassifier: Send + Sync {
    fn is_configured(&self) -> bool;
    async fn classify(
        &self,
        sentences: &[String],
        budget: Duration,
    ) -> ProviderOutcome<LabelRanking>;
}

#[async_trait]
pub trait ProductRewriter: Send + Sync {
    fn provider(&self) -> Provider;
    fn is_configured(&self) -> bool;
    async fn rewrite(
        &self,
        request: &RewriteRequest,
        budget: Duration,
    ) -> ProviderOutcome<RewriteOutput>;
}

/// Configured per-call timeout clamped to the allowed window, then to what is left of the budget.
pub fn clamp_timeout(configured: Duration, remaining: Duration) -> Duration {
    configured
        .clamp(MIN_PROVIDER_TIMEOUT, MAX_PROVIDER_TIMEOUT)
        .min(remaining)
}

/// Runs an adapter future under `budget`, folding errors and elapsed time into an outcome.
pub(crate) async fn bounded<T, F>(budget: Duration, call: F) -> ProviderOutcome<T>
where
    F: std::future::Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(budget, call).await {
        Ok(result) => result.into(),
        Err(_) => ProviderOutcome::TimedOut,
    }
}
