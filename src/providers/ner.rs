use super::{
    EntityRecognizer, Entity, ProviderError, ProviderOutcome, bounded, clamp_timeout,
};
use crate::config::HfConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

/// Hugging Face token-classification endpoint.
pub struct HfNer {
    http: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HfNer {
    pub fn new(config: &HfConfig, http: Client) -> Self {
        Self {
            http,
            base_url: config.base_url.clone(),
            model: config.ner_model.clone(),
            api_key: config.api_key.clone(),
            timeout: config.ner_timeout,
        }
    }

    async fn call(&self, text: &str, timeout: Duration) -> Result<Vec<Entity>, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("HF_API_KEY is not set".into()))?;
        let url = format!(
            "{}/models/{}",
            self.base_url,
            urlencoding::encode(&self.model)
        );
        let body = json!({
            "inputs": text,
            "parameters": { "aggregation_strategy": "simple" },
            "options": { "wait_for_model": true },
        });
        let response = self
            .http
            .post(url)
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
        let entities = group_spans(parse_entities(payload)?);
        debug!(target: "analyzer.ner", count = entities.len(), "entities recognized");
        Ok(entities)
    }
}

#[async_trait]
impl EntityRecognizer for HfNer {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn recognize(&self, text: &str, budget: Duration) -> ProviderOutcome<Vec<Entity>> {
        let timeout = clamp_timeout(self.timeout, budget);
        let outcome = bounded(timeout, self.call(text, timeout)).await;
        if !outcome.is_ok() {
            warn!(
                target: "analyzer.ner",
                outcome = outcome.label(),
                reason = outcome.reason().unwrap_or(""),
                "ner call degraded"
            );
        }
        outcome
    }
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    #[serde(default, alias = "entity")]
    entity_group: Option<String>,
    #[serde(default)]
    word: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    start: Option<usize>,
    #[serde(default)]
    end: Option<usize>,
}

/// Validates the raw payload; entries without a word, a group or a sane score are dropped.
pub fn parse_entities(payload: Value) -> Result<Vec<Entity>, ProviderError> {
    let Value::Array(items) = payload else {
        return Err(ProviderError::InvalidResponse(
            "expected a JSON array of entities".into(),
        ));
    };
    let mut entities = Vec::with_capacity(items.len());
    for item in items {
        let Ok(raw) = serde_json::from_value::<RawEntity>(item) else {
            continue;
        };
        let (Some(group), Some(word), Some(score)) = (raw.entity_group, raw.word, raw.score) else {
            continue;
        };
        let word = word.trim().to_string();
        if word.is_empty() || !(0.0..=1.0).contains(&score) {
            continue;
        }
        let group = group
            .trim_start_matches("B-")
            .trim_start_matches("I-")
            .to_uppercase();
        let start = raw.start.unwrap_or(0);
        entities.push(Entity {
            group,
            start,
            end: raw.end.unwrap_or(start + word.chars().count()),
            word,
            score: score as f32,
        });
    }
    Ok(entities)
}

/// Joins adjacent spans of the same group (gap of at most one character) using the mean score.
pub fn group_spans(entities: Vec<Entity>) -> Vec<Entity> {
    let mut grouped: Vec<(Entity, f32, u32)> = Vec::new();
    for entity in entities {
        if let Some((last, sum, count)) = grouped.last_mut()
            && last.group == entity.group
            && entity.start >= last.end
            && entity.start - last.end <= 1
        {
            let piece = entity.word.trim_start_matches("##");
            if entity.start == last.end {
                last.word.push_str(piece);
            } else {
                last.word.push(' ');
                last.word.push_str(piece);
            }
            last.end = entity.end;
            *sum += entity.score;
            *count += 1;
            continue;
        }
        let score = entity.score;
        grouped.push((entity, score, 1));
    }
    grouped
        .into_iter()
        .map(|(mut entity, sum, count)| {
            entity.score = sum / count as f32;
            entity
        })
        .collect()
}
