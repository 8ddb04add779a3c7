use super::schema::parse_rewrite;
use super::{
    Provider, ProductRewriter, ProviderError, ProviderOutcome, RewriteOutput, RewriteRequest,
    bounded, clamp_timeout,
};
use crate::config::RewriteConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_INPUT_CHARS: usize = 4000;

const SYSTEM_PROMPT: &str = "أنت محرر بيانات منتجات لمتجر عربي. استخرج من نص التاجر كائن JSON واحد فقط بالمفاتيح: \
name, description, description_table, tags, sizes, colors, price_range, notes, confidence. لا تضف أي مفتاح آخر.
- name: اسم المنتج بالعربية بين 3 و 60 حرفاً، بدون أسعار أو رموز تعبيرية أو عبارات مثل احجزي واطلبي.
- description: ثلاث جمل كحد أقصى، لا تكرر الاسم ولا تذكر الأسعار أو المقاسات.
- description_table: حتى 12 صفاً بالشكل {\"key\": نص, \"label\": نص, \"value\": نص, \"confidence\": رقم} للأبعاد والخامة والمكونات، بدون الأسعار.
- tags: حتى 8 كلمات مفتاحية وصفية، بدون كلمات تسويقية عامة مثل جديد وفخم وعرض.
- sizes: المقاسات كما وردت (S, M, L, XL أو أرقام أو فري سايز).
- colors: أسماء الألوان المذكورة فقط.
- price_range: {\"low\": رقم, \"high\": رقم} من السعر بالعملة القديمة أو الشمال فقط؛ تجاهل الجديد والجنوبي والسعودي.
- confidence: رقم بين 0 و 1 يعبر عن ثقتك.
لا تخترع معلومات غير موجودة في النص. أعد JSON فقط بدون أي شرح.";

const CORRECTION_HINT: &str =
    "صحح الحقول الضعيفة المذكورة في weak_fields فقط واترك بقية الحقول خارج الرد.";

const GENERAL_HINT: &str =
    "يمكنك الاستعانة بالصور المرفقة لتحديد الألوان والخامة، لكن النص هو المرجع الأول.";

/// OpenAI-compatible `chat/completions` rewriter; DeepSeek and OpenAI differ only in prompt hint
/// and image support.
pub struct ChatRewriter {
    http: Client,
    config: RewriteConfig,
    max_images: usize,
}

impl ChatRewriter {
    pub fn new(config: RewriteConfig, http: Client, max_images: usize) -> Self {
        Self {
            http,
            config,
            max_images,
        }
    }

    fn accepts_images(&self) -> bool {
        self.config.provider == Provider::Openai && self.max_images > 0
    }

    fn build_request(&self, request: &RewriteRequest) -> ChatRequest {
        let hint = if self.config.provider == Provider::Openai {
            GENERAL_HINT
        } else {
            CORRECTION_HINT
        };
        let text: String = request.text.chars().take(MAX_INPUT_CHARS).collect();
        let user = json!({
            "text": text,
            "baseline": request.baseline,
            "weak_fields": request.weak_fields,
        })
        .to_string();

        let images: Vec<&String> = if self.accepts_images() {
            request
                .images
                .iter()
                .filter(|url| url.starts_with("https://") || url.starts_with("http://"))
                .take(self.max_images)
                .collect()
        } else {
            Vec::new()
        };
        let content = if images.is_empty() {
            MessageContent::Text(user)
        } else {
            let mut parts = vec![ContentPart::Text { text: user }];
            parts.extend(images.into_iter().map(|url| ContentPart::ImageUrl {
                image_url: ImageUrl { url: url.clone() },
            }));
            MessageContent::Parts(parts)
        };

        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: MessageContent::Text(format!("{SYSTEM_PROMPT}\n{hint}")),
                },
                ChatMessage {
                    role: "user",
                    content,
                },
            ],
            temperature: 0.1,
            top_p: 0.7,
            max_tokens: 600,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        }
    }

    async fn call(
        &self,
        request: &RewriteRequest,
        timeout: Duration,
    ) -> Result<RewriteOutput, ProviderError> {
        let key = self.config.api_key.as_deref().ok_or_else(|| {
            ProviderError::Unavailable(format!("{} api key is not set", self.config.provider))
        })?;
        let body = self.build_request(request);
        let response = self
            .http
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(key)
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ProviderError::Http(format!("HTTP {}", response.status())));
        }
        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
        let content = payload
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("missing message content".into()))?;
        let output = parse_rewrite(&content)?;
        debug!(
            target: "analyzer.llm",
            provider = %self.config.provider,
            "rewrite accepted"
        );
        Ok(output)
    }
}

#[async_trait]
impl ProductRewriter for ChatRewriter {
    fn provider(&self) -> Provider {
        self.config.provider
    }

    fn is_configured(&self) -> bool {
        self.config.api_key.is_some()
    }

    async fn rewrite(
        &self,
        request: &RewriteRequest,
        budget: Duration,
    ) -> ProviderOutcome<RewriteOutput> {
        let timeout = clamp_timeout(self.config.timeout, budget);
        let outcome = bounded(timeout, self.call(request, timeout)).await;
        if !outcome.is_ok() {
            warn!(
                target: "analyzer.llm",
                provider = %self.config.provider,
                outcome = outcome.label(),
                reason = outcome.reason().unwrap_or(""),
                "rewrite degraded"
            );
        }
        outcome
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;
    use crate::text::{extract_baseline, normalize};

    fn request(images: Vec<String>) -> RewriteRequest {
        let baseline = extract_baseline(&normalize("فستان سهرة\nالسعر للشمال 3500"));
        RewriteRequest {
            text: "فستان سهرة\nالسعر للشمال 3500".into(),
            weak_fields: baseline.weak_fields(),
            baseline,
            images,
        }
    }

    #[test]
    fn general_variant_attaches_http_images_only() {
        let config = AnalyzerConfig::default();
        let rewriter = ChatRewriter::new(config.openai.clone(), Client::new(), 2);
        let body = serde_json::to_value(rewriter.build_request(&request(vec![
            "https://cdn.example.com/a.jpg".into(),
            "data:image/png;base64,AAAA".into(),
            "https://cdn.example.com/b.jpg".into(),
            "https://cdn.example.com/c.jpg".into(),
        ])))
        .unwrap();
        let parts = body["messages"][1]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "https://cdn.example.com/a.jpg");
        assert_eq!(body["response_format"]["type"], "json_object");
    }

    #[test]
    fn correction_variant_sends_plain_text() {
        let config = AnalyzerConfig::default();
        let rewriter = ChatRewriter::new(config.deepseek.clone(), Client::new(), 6);
        let body = serde_json::to_value(
            rewriter.build_request(&request(vec!["https://cdn.example.com/a.jpg".into()])),
        )
        .unwrap();
        assert_eq!(body["model"], "deepseek-chat");
        let user = body["messages"][1]["content"].as_str().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(user).unwrap();
        assert!(parsed["weak_fields"].as_array().is_some());
        assert!(
            body["messages"][0]["content"]
                .as_str()
                .unwrap()
                .contains("weak_fields")
        );
    }

    #[tokio::test]
    async fn missing_key_is_unavailable() {
        let config = AnalyzerConfig::default();
        let rewriter = ChatRewriter::new(config.deepseek.clone(), Client::new(), 0);
        assert!(!rewriter.is_configured());
        let outcome = rewriter.rewrite(&request(vec![]), Duration::from_secs(5)).await;
        assert_eq!(outcome.label(), "unavailable");
    }
}
