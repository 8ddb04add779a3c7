use super::{
    LabelRanking, ProviderError, ProviderOutcome, ScoredSentence, SentenceClassifier, bounded,
    clamp_timeout,
};
use crate::config::HfConfig;
use crate::text::normalize::MAX_SENTENCES;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub const LABELS: [&str; 7] = [
    "product name",
    "product description",
    "price",
    "sizes",
    "colors",
    "material",
    "marketing",
];

/// Lazily created handle shared by every caller in the process.
///
/// Concurrent first callers wait on the same in-flight load. A successful load is kept for the
/// life of the process; a failed one is not, so the next caller tries again.
pub struct ModelSlot<M> {
    cell: OnceCell<Arc<M>>,
}

impl<M> ModelSlot<M> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
        }
    }

    pub async fn get_or_load<F, Fut>(&self, load: F) -> Result<Arc<M>, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<M, ProviderError>>,
    {
        self.cell
            .get_or_try_init(|| async { load().await.map(Arc::new) })
            .await
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

impl<M> Default for ModelSlot<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolved inference endpoint and the label set sent with every request.
///
/// Building one makes no network call; the hosted model loads on the first classification,
/// which asks the API to wait for it.
#[derive(Debug)]
pub struct ZeroShotModel {
    pub model: String,
    pub endpoint: String,
    pub labels: Vec<String>,
}

impl ZeroShotModel {
    pub fn resolve(base_url: &str, model: &str, labels: &[&str]) -> Result<Self, ProviderError> {
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(ProviderError::Unavailable(format!(
                "inference URL `{base_url}` is not http(s)"
            )));
        }
        let model = model.trim();
        if model.is_empty() || model.contains(char::is_whitespace) {
            return Err(ProviderError::Unavailable(format!(
                "zero-shot model id `{model}` is invalid"
            )));
        }
        let mut resolved: Vec<String> = Vec::with_capacity(labels.len());
        for label in labels.iter().map(|label| label.trim()) {
            if !label.is_empty() && !resolved.iter().any(|known| known == label) {
                resolved.push(label.to_string());
            }
        }
        if resolved.is_empty() {
            return Err(ProviderError::Unavailable("no candidate labels".into()));
        }
        info!(target: "analyzer.zsc", model, labels = resolved.len(), "zero-shot model resolved");
        Ok(Self {
            model: model.to_string(),
            endpoint: format!("{base_url}/models/{}", urlencoding::encode(model)),
            labels: resolved,
        })
    }
}

static SHARED_MODEL: Lazy<Arc<ModelSlot<ZeroShotModel>>> =
    Lazy::new(|| Arc::new(ModelSlot::new()));

pub struct HfZeroShot {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    slot: Arc<ModelSlot<ZeroShotModel>>,
}

impl HfZeroShot {
    pub fn new(config: &HfConfig, http: Client) -> Self {
        Self::with_slot(config, http, SHARED_MODEL.clone())
    }

    pub fn with_slot(config: &HfConfig, http: Client, slot: Arc<ModelSlot<ZeroShotModel>>) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            model: config.zsc_model.clone(),
            api_key: config.api_key.clone(),
            timeout: config.zsc_timeout,
            slot,
        }
    }

    async fn call(
        &self,
        sentences: &[String],
        timeout: Duration,
    ) -> Result<LabelRanking, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("HF_API_KEY is not set".into()))?;
        let sentences = &sentences[..sentences.len().min(MAX_SENTENCES)];
        if sentences.is_empty() {
            return Ok(LabelRanking::new());
        }
        let model = self
            .slot
            .get_or_load(|| async {
                ZeroShotModel::resolve(&self.base_url, &self.model, &LABELS)
            })
            .await?;
        let body = json!({
            "inputs": sentences,
            "parameters": { "candidate_labels": model.labels, "multi_label": true },
            "options": { "wait_for_model": true },
        });
        let response = self
            .http
            .post(&model.endpoint)
            .bearer_auth(key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Http(format!("HTTP {}", response.status())));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
        let mut ranking = rank(sentences, payload)?;
        ranking.retain(|label, _| model.labels.contains(label));
        debug!(target: "analyzer.zsc", labels = ranking.len(), "sentences classified");
        Ok(ranking)
    }
}

#[async_trait]
impl SentenceClassifier for HfZeroShot {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn classify(
        &self,
        sentences: &[String],
        budget: Duration,
    ) -> ProviderOutcome<LabelRanking> {
        let timeout = clamp_timeout(self.timeout, budget);
        let outcome = bounded(timeout, self.call(sentences, timeout)).await;
        if !outcome.is_ok() {
            warn!(
                target: "analyzer.zsc",
                outcome = outcome.label(),
                reason = outcome.reason().unwrap_or(""),
                "zero-shot call degraded"
            );
        }
        outcome
    }
}

#[derive(Debug, Deserialize)]
struct Classification {
    labels: Vec<String>,
    scores: Vec<f64>,
}

/// Builds the per-label ranking from one classification per sentence.
pub fn rank(sentences: &[String], payload: Value) -> Result<LabelRanking, ProviderError> {
    let results: Vec<Classification> = match payload {
        Value::Array(_) => serde_json::from_value(payload),
        Value::Object(_) => serde_json::from_value(payload).map(|single| vec![single]),
        _ => {
            return Err(ProviderError::InvalidResponse(
                "expected classification results".into(),
            ));
        }
    }
    .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;

    if results.len() != sentences.len() {
        return Err(ProviderError::InvalidResponse(format!(
            "{} results for {} sentences",
            results.len(),
            sentences.len()
        )));
    }

    let mut ranking = LabelRanking::new();
    for (sentence, result) in sentences.iter().zip(results) {
        if result.labels.len() != result.scores.len() {
            return Err(ProviderError::InvalidResponse(
                "labels and scores differ in length".into(),
            ));
        }
        for (label, score) in result.labels.into_iter().zip(result.scores) {
            if !(0.0..=1.0).contains(&score) {
                continue;
            }
            ranking.entry(label).or_default().push(ScoredSentence {
                sentence: sentence.clone(),
                score: score as f32,
            });
        }
    }
    for ranked in ranking.values_mut() {
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    }
    Ok(ranking)
}
