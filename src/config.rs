use crate::providers::Provider;
use std::time::Duration;

pub const DEFAULT_HF_URL: &str = "https://api-inference.huggingface.co";
pub const DEFAULT_NER_MODEL: &str = "CAMeL-Lab/bert-base-arabic-camelbert-msa-ner";
pub const DEFAULT_ZSC_MODEL: &str = "joeddav/xlm-roberta-large-xnli";
pub const DEFAULT_PROVIDER_TIMEOUT_MS: u64 = 12_000;
pub const DEFAULT_BUDGET_MS: u64 = 25_000;

#[derive(Debug, Clone)]
pub struct HfConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub ner_model: String,
    pub zsc_model: String,
    pub ner_timeout: Duration,
    pub zsc_timeout: Duration,
}

/// One OpenAI-compatible chat endpoint used for rewrites.
#[derive(Debug, Clone)]
pub struct RewriteConfig {
    pub provider: Provider,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    pub hf: HfConfig,
    pub deepseek: RewriteConfig,
    pub openai: RewriteConfig,
    pub primary: Provider,
    pub alternate_enabled: bool,
    pub budget: Duration,
    pub max_images: usize,
    pub max_image_bytes: usize,
}

impl AnalyzerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let millis = |key: &str, default: u64| {
            Duration::from_millis(
                get(key)
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(default),
            )
        };
        let llm_timeout = millis("LLM_TIMEOUT_MS", DEFAULT_PROVIDER_TIMEOUT_MS);

        let hf = HfConfig {
            api_key: get("HF_API_KEY").or_else(|| get("HUGGINGFACE_API_KEY")),
            base_url: get("HF_INFERENCE_URL")
                .unwrap_or_else(|| DEFAULT_HF_URL.into())
                .trim_end_matches('/')
                .to_string(),
            ner_model: get("HF_NER_MODEL").unwrap_or_else(|| DEFAULT_NER_MODEL.into()),
            zsc_model: get("ZSC_MODEL").unwrap_or_else(|| DEFAULT_ZSC_MODEL.into()),
            ner_timeout: millis("NER_TIMEOUT_MS", DEFAULT_PROVIDER_TIMEOUT_MS),
            zsc_timeout: millis("ZSC_TIMEOUT_MS", DEFAULT_PROVIDER_TIMEOUT_MS),
        };

        let deepseek = RewriteConfig {
            provider: Provider::Deepseek,
            api_key: get("DEEPSEEK_API_KEY"),
            model: get("DEEPSEEK_MODEL").unwrap_or_else(|| "deepseek-chat".into()),
            base_url: get("DEEPSEEK_BASE_URL")
                .unwrap_or_else(|| "https://api.deepseek.com/v1".into())
                .trim_end_matches('/')
                .to_string(),
            timeout: llm_timeout,
        };
        let openai = RewriteConfig {
            provider: Provider::Openai,
            api_key: get("OPENAI_API_KEY"),
            model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            base_url: get("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".into())
                .trim_end_matches('/')
                .to_string(),
            timeout: llm_timeout,
        };

        let primary = match get("LLM_PRIMARY").map(|v| v.to_lowercase()).as_deref() {
            Some("openai") => Provider::Openai,
            _ => Provider::Deepseek,
        };

        Self {
            hf,
            deepseek,
            openai,
            primary,
            alternate_enabled: get("LLM_ALTERNATE_ENABLED")
                .map(|v| parse_bool(&v))
                .unwrap_or(true),
            budget: millis("ANALYZE_BUDGET_MS", DEFAULT_BUDGET_MS),
            max_images: get("ANALYZE_MAX_IMAGES")
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(6),
            max_image_bytes: get("ANALYZE_MAX_IMAGE_MB")
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(2)
                * 1024
                * 1024,
        }
    }

    /// Rewrite endpoints in attempt order: primary first, then the alternate.
    pub fn rewrite_order(&self) -> [&RewriteConfig; 2] {
        match self.primary {
            Provider::Openai => [&self.openai, &self.deepseek],
            _ => [&self.deepseek, &self.openai],
        }
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
