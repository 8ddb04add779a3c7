use crate::pipeline::{AnalysisMeta, AnalyzeOptions};
use crate::product::AnalyzedProduct;
use crate::providers::Provider;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnalyzeRequest {
    pub text: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub options: AnalyzeOptions,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AnalyzeResponse {
    pub analyzed: AnalyzedProduct,
    pub meta: AnalysisMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageStatus::Pending | StageStatus::Running)
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub providers: Vec<Provider>,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Pending,
            providers: Vec::new(),
            elapsed_ms: 0,
            timestamp: Utc::now(),
            detail: None,
            output: Value::Null,
        }
    }

    pub fn begin(&mut self) {
        self.status = StageStatus::Running;
        self.timestamp = Utc::now();
    }

    pub fn finish(&mut self, status: StageStatus, elapsed_ms: u128) {
        self.status = status;
        self.elapsed_ms = elapsed_ms;
    }

    pub fn skipped(name: &str, reason: &str) -> Self {
        let mut report = Self::new(name);
        report.status = StageStatus::Skipped;
        report.detail = Some(reason.to_string());
        report
    }
}

#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub detail: Option<String>,
}
