//! Exact output contract for rewrite models.

use super::ProviderError;
use crate::text::normalize::normalize_digits;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const NAME_CHARS: std::ops::RangeInclusive<usize> = 3..=60;
pub const DESCRIPTION_CHARS: std::ops::RangeInclusive<usize> = 10..=600;
pub const MAX_DESCRIPTION_SENTENCES: usize = 3;
pub const MAX_TAGS: usize = 8;
pub const MAX_SIZES: usize = 20;
pub const MAX_COLORS: usize = 24;
pub const MAX_TABLE_ROWS: usize = 12;
pub const MAX_ROW_VALUE_CHARS: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewriteOutput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub description_table: Option<Vec<RewriteRow>>,
    pub tags: Option<Vec<String>>,
    pub sizes: Option<Vec<String>>,
    pub colors: Option<Vec<String>>,
    pub price_range: Option<RewritePrice>,
    pub notes: Option<String>,
    pub confidence: Option<f32>,
    pub reasons: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewritePrice {
    pub low: f64,
    pub high: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewriteRow {
    pub key: String,
    pub label: String,
    pub value: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl RewriteOutput {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.description_table.is_none()
            && self.tags.is_none()
            && self.sizes.is_none()
            && self.colors.is_none()
            && self.price_range.is_none()
            && self.notes.is_none()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("no fields returned".into());
        }
        if let Some(name) = &self.name
            && !NAME_CHARS.contains(&name.trim().chars().count())
        {
            return Err(format!("name length {}", name.chars().count()));
        }
        if let Some(description) = &self.description {
            let len = description.trim().chars().count();
            if !DESCRIPTION_CHARS.contains(&len) {
                return Err(format!("description length {len}"));
            }
            if sentence_count(description) > MAX_DESCRIPTION_SENTENCES {
                return Err("description has more than three sentences".into());
            }
        }
        if let Some(rows) = &self.description_table {
            if rows.len() > MAX_TABLE_ROWS {
                return Err(format!("{} table rows", rows.len()));
            }
            for row in rows {
                if [&row.key, &row.label, &row.value].iter().any(|f| f.trim().is_empty()) {
                    return Err("table row with an empty cell".into());
                }
                if row.value.chars().count() > MAX_ROW_VALUE_CHARS {
                    return Err(format!("table row {} is too long", row.key));
                }
                if row.confidence.is_some_and(|c| !(0.0..=1.0).contains(&c)) {
                    return Err(format!("table row {} confidence", row.key));
                }
            }
        }
        if let Some(tags) = &self.tags {
            if tags.len() > MAX_TAGS {
                return Err(format!("{} tags", tags.len()));
            }
            if tags.iter().any(|t| t.trim().chars().count() < 2) {
                return Err("tag shorter than two characters".into());
            }
        }
        if self.sizes.as_ref().is_some_and(|s| s.len() > MAX_SIZES) {
            return Err("too many sizes".into());
        }
        if self.colors.as_ref().is_some_and(|c| c.len() > MAX_COLORS) {
            return Err("too many colors".into());
        }
        if let Some(price) = self.price_range {
            let sane = price.low.is_finite()
                && price.high.is_finite()
                && price.low >= 0.0
                && price.low <= price.high;
            if !sane {
                return Err(format!("price range {}..{}", price.low, price.high));
            }
        }
        if let Some(confidence) = self.confidence
            && !(0.0..=1.0).contains(&confidence)
        {
            return Err(format!("confidence {confidence}"));
        }
        Ok(())
    }
}

fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?', '؟'])
        .filter(|part| part.chars().any(|c| c.is_alphanumeric()))
        .count()
}

/// Extracts, deserialises and validates a model reply.
pub fn parse_rewrite(content: &str) -> Result<RewriteOutput, ProviderError> {
    let body = strip_markdown_fence(content);
    let json = match (body.find('{'), body.rfind('}')) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => return Err(ProviderError::InvalidResponse("no JSON object in reply".into())),
    };
    let output: RewriteOutput = serde_json::from_str(&normalize_digits(json))
        .map_err(|err| ProviderError::InvalidResponse(err.to_string()))?;
    output.validate().map_err(ProviderError::InvalidResponse)?;
    Ok(output)
}

fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    trimmed
        .lines()
        .skip(1)
        .take_while(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_fenced_json_with_arabic_digits() {
        let reply = "```json\n{\"name\": \"طقم نسائي حرير\", \"price_range\": {\"low\": ٣٥٠٠, \"high\": ٣٥٠٠}, \"confidence\": 0.8}\n```";
        let out = parse_rewrite(reply).unwrap();
        assert_eq!(out.name.as_deref(), Some("طقم نسائي حرير"));
        assert_eq!(out.price_range.unwrap().low, 3500.0);
    }

    #[test]
    fn rejects_unknown_keys_and_wrong_types() {
        assert!(parse_rewrite(r#"{"name": "طقم نسائي", "brand": "x"}"#).is_err());
        assert!(parse_rewrite(r#"{"name": "طقم نسائي", "tags": "حرير"}"#).is_err());
        assert!(parse_rewrite(r#"{"price_range": {"low": "cheap", "high": 10}}"#).is_err());
    }

    #[test]
    fn enforces_field_limits() {
        assert!(parse_rewrite(r#"{"name": "طق"}"#).is_err());
        assert!(parse_rewrite(r#"{"price_range": {"low": 500, "high": 100}}"#).is_err());
        assert!(parse_rewrite(r#"{"name": "طقم نسائي", "confidence": 1.4}"#).is_err());
        assert!(
            parse_rewrite(r#"{"description": "جملة اولى. جملة ثانية. جملة ثالثة. جملة رابعة."}"#)
                .is_err()
        );
        let tags: Vec<String> = (0..9).map(|i| format!("وسم{i}")).collect();
        let reply = serde_json::json!({ "tags": tags }).to_string();
        assert!(parse_rewrite(&reply).is_err());
    }

    #[test]
    fn rejects_empty_or_missing_objects() {
        assert!(parse_rewrite("{}").is_err());
        assert!(parse_rewrite("sorry, I cannot help").is_err());
    }

    #[test]
    fn prose_around_the_object_is_ignored() {
        let out = parse_rewrite("Here you go: {\"tags\": [\"حرير\", \"تركي\"]} thanks").unwrap();
        assert_eq!(out.tags.unwrap().len(), 2);
    }

    #[test]
    fn description_table_rows_are_checked() {
        let out = parse_rewrite(
            r#"{"description_table": [{"key": "material", "label": "الخامة", "value": "حرير", "confidence": 0.8}, {"key": "dimensions", "label": "الأبعاد", "value": "الطول 240"}]}"#,
        )
        .unwrap();
        let rows = out.description_table.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].confidence, None);

        assert!(parse_rewrite(r#"{"description_table": [{"key": "material", "label": "الخامة", "value": " "}]}"#).is_err());
        assert!(parse_rewrite(r#"{"description_table": [{"key": "material", "label": "الخامة", "value": "حرير", "unit": "x"}]}"#).is_err());
        assert!(parse_rewrite(r#"{"description_table": [{"key": "m", "label": "l", "value": "v", "confidence": 2}]}"#).is_err());
    }
}
