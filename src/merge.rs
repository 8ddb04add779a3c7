//! Combines the rule baseline with whatever the providers returned.
//!
//! The rewrite model may only replace weak baseline fields. Entity and zero-shot output only
//! supplements: extra tags, corroborated colors, and a description when none was found.

use crate::product::{
    AnalyzedField, AnalyzedProduct, DetailRow, FieldSource, MAX_DESCRIPTION_SENTENCES,
    MAX_NAME_CHARS, MAX_SIZES, MAX_TABLE_ROWS, MAX_TAGS, PriceRange,
};
use crate::providers::schema::RewriteRow;
use crate::providers::{Entity, LabelRanking, RewriteOutput};
use crate::text::lexicon::{self, fold};
use crate::text::{price, rules};
use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_LLM_CONFIDENCE: f32 = 0.7;
pub const MAX_LLM_CONFIDENCE: f32 = 0.9;
/// Ceiling for a price that only the rewrite model found.
pub const MAX_LLM_PRICE_CONFIDENCE: f32 = 0.5;
pub const MIN_ENTITY_SCORE: f32 = 0.6;
pub const MIN_LABEL_SCORE: f32 = 0.5;
const MAX_SUPPLEMENT_CONFIDENCE: f32 = 0.9;

const TAG_ENTITY_GROUPS: &[&str] = &["ORG", "MISC", "LOC", "PRODUCT"];

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3,}").unwrap());

/// Borrowed view of every provider result; `None` means the stage contributed nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProviderSignals<'a> {
    pub entities: Option<&'a [Entity]>,
    pub labels: Option<&'a LabelRanking>,
    pub rewrite: Option<&'a RewriteOutput>,
}

pub fn merge(baseline: &AnalyzedProduct, signals: ProviderSignals<'_>) -> AnalyzedProduct {
    let mut product = baseline.clone();
    if let Some(rewrite) = signals.rewrite {
        apply_rewrite(&mut product, baseline, rewrite);
    }
    supplement_tags(&mut product, signals.entities, signals.labels);
    if let Some(labels) = signals.labels {
        corroborate_colors(&mut product, labels);
        fill_description(&mut product, labels);
    }
    product
}

fn apply_rewrite(product: &mut AnalyzedProduct, baseline: &AnalyzedProduct, rewrite: &RewriteOutput) {
    let confidence = rewrite
        .confidence
        .unwrap_or(DEFAULT_LLM_CONFIDENCE)
        .min(MAX_LLM_CONFIDENCE);

    if baseline.name.is_weak()
        && let Some(name) = rewrite.name.as_deref().map(str::trim)
        && is_valid_name(name)
    {
        product.name = llm_field(confidence, name.to_string());
    }

    if baseline.description.is_weak()
        && let Some(description) = rewrite.description.as_deref().map(str::trim)
        && is_valid_description(description, &product.name.value)
    {
        product.description = llm_field(confidence, description.to_string());
    }

    if baseline.description_table.is_weak()
        && let Some(rows) = &rewrite.description_table
    {
        let table = table_rows(rows, confidence);
        if !table.is_empty() {
            product.description_table = llm_field(confidence, table);
        }
    }

    if baseline.price_range.value.is_empty()
        && let Some(range) = rewrite.price_range
        && range.high > 0.0
        && range.low >= 0.0
        && range.low <= range.high
    {
        product.price_range = AnalyzedField::new(
            PriceRange {
                low: range.low,
                high: range.high,
            },
            confidence.min(MAX_LLM_PRICE_CONFIDENCE),
            FieldSource::Llm,
        );
    }

    if baseline.colors.is_weak()
        && let Some(colors) = &rewrite.colors
    {
        let canonical = dedup(colors.iter().filter_map(|c| lexicon::color(c.trim())));
        if !canonical.is_empty() {
            product.colors = llm_field(confidence, canonical);
        }
    }

    if baseline.sizes.is_weak()
        && let Some(sizes) = &rewrite.sizes
    {
        let sizes = dedup(sizes.iter().map(|s| s.trim()).filter(|s| !s.is_empty()));
        if !sizes.is_empty() && sizes.len() <= MAX_SIZES {
            product.sizes = llm_field(confidence, sizes);
        }
    }

    if baseline.tags.is_weak()
        && let Some(tags) = &rewrite.tags
    {
        let mut tags = dedup(
            tags.iter()
                .map(|t| t.trim())
                .filter(|t| t.chars().count() >= 2 && !is_marketing_tag(t)),
        );
        tags.truncate(MAX_TAGS);
        if !tags.is_empty() {
            product.tags = llm_field(confidence, tags);
        }
    }

    if baseline.notes.value.is_empty()
        && let Some(notes) = rewrite.notes.as_deref().map(str::trim)
        && !notes.is_empty()
    {
        product.notes = llm_field(confidence, notes.to_string());
    }
}

/// Rewrite rows with unique keys; price lines are left to `price_range`.
fn table_rows(rows: &[RewriteRow], confidence: f32) -> Vec<DetailRow> {
    let mut table: Vec<DetailRow> = Vec::new();
    for row in rows {
        let (key, value) = (row.key.trim(), row.value.trim());
        if value.is_empty() || price::is_price_segment(value) || table.iter().any(|r| r.key == key) {
            continue;
        }
        let row_confidence = row.confidence.unwrap_or(confidence).min(MAX_LLM_CONFIDENCE);
        table.push(DetailRow::new(key, row.label.trim(), value, row_confidence));
    }
    table.truncate(MAX_TABLE_ROWS);
    table
}

fn llm_field<T>(confidence: f32, value: T) -> AnalyzedField<T> {
    AnalyzedField::new(value, confidence, FieldSource::Llm)
}

pub fn is_valid_name(name: &str) -> bool {
    let len = name.chars().count();
    len > 0
        && len <= MAX_NAME_CHARS
        && !DIGIT_RUN.is_match(name)
        && !lexicon::tokens(name).any(lexicon::is_call_to_action)
        && lexicon::tokens(name).any(|t| !lexicon::is_marketing_noise(t))
}

pub fn is_valid_description(description: &str, name: &str) -> bool {
    !description.is_empty()
        && !price::is_price_segment(description)
        && !DIGIT_RUN.is_match(description)
        && !rules::mentions_size(description)
        && !restates(description, name)
}

/// Either text contains the other once folded.
fn restates(description: &str, name: &str) -> bool {
    let (description, name) = (fold(description), fold(name));
    !name.is_empty() && (description.contains(&name) || name.contains(&description))
}

fn is_marketing_tag(tag: &str) -> bool {
    lexicon::tokens(tag).all(|t| lexicon::is_generic(t) || lexicon::is_stop_word(t))
}

fn dedup<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if !out.iter().any(|v| fold(v) == fold(value)) {
            out.push(value.to_string());
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
struct TagCandidate {
    tag: String,
    confidence: f32,
    source: FieldSource,
}

/// Entity and material-label suggestions, one per folded spelling.
///
/// Conflicts keep the higher confidence; equal confidences go to the source with the lower
/// [`FieldSource::priority`], so entities win over zero-shot labels.
fn tag_candidates(entities: Option<&[Entity]>, labels: Option<&LabelRanking>) -> Vec<TagCandidate> {
    let mut raw: Vec<TagCandidate> = Vec::new();
    for entity in entities.unwrap_or_default() {
        if !TAG_ENTITY_GROUPS.contains(&entity.group.as_str()) || entity.score < MIN_ENTITY_SCORE {
            continue;
        }
        let tag = entity.word.trim().trim_start_matches("##").trim();
        if tag.chars().count() < 2 || DIGIT_RUN.is_match(tag) || is_marketing_tag(tag) {
            continue;
        }
        raw.push(TagCandidate {
            tag: tag.to_string(),
            confidence: entity.score.min(MAX_SUPPLEMENT_CONFIDENCE),
            source: FieldSource::Ner,
        });
    }
    if let Some(materials) = labels.and_then(|l| l.get("material")) {
        for scored in materials.iter().filter(|s| s.score >= MIN_LABEL_SCORE) {
            for token in lexicon::tokens(&scored.sentence) {
                if let Some(material) = lexicon::material(token) {
                    raw.push(TagCandidate {
                        tag: material.to_string(),
                        confidence: scored.score.min(MAX_SUPPLEMENT_CONFIDENCE),
                        source: FieldSource::Zsc,
                    });
                }
            }
        }
    }

    let mut best: Vec<TagCandidate> = Vec::new();
    for candidate in raw {
        match best.iter_mut().find(|b| fold(&b.tag) == fold(&candidate.tag)) {
            Some(existing) => {
                let better = candidate.confidence > existing.confidence
                    || (candidate.confidence == existing.confidence
                        && candidate.source.priority() < existing.source.priority());
                if better {
                    *existing = candidate;
                }
            }
            None => best.push(candidate),
        }
    }
    best.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.source.priority().cmp(&b.source.priority()))
    });
    best
}

fn supplement_tags(
    product: &mut AnalyzedProduct,
    entities: Option<&[Entity]>,
    labels: Option<&LabelRanking>,
) {
    let candidates = tag_candidates(entities, labels);
    let Some(top) = candidates.first().cloned() else {
        return;
    };
    let was_empty = product.tags.value.is_empty();
    let mut added = false;
    for candidate in candidates {
        if product.tags.value.len() >= MAX_TAGS {
            break;
        }
        if product
            .tags
            .value
            .iter()
            .any(|t| fold(t) == fold(&candidate.tag))
        {
            continue;
        }
        product.tags.value.push(candidate.tag);
        added = true;
    }
    if was_empty && added {
        product.tags.confidence = top.confidence;
        product.tags.source = top.source;
    }
}

fn corroborate_colors(product: &mut AnalyzedProduct, labels: &LabelRanking) {
    if product.colors.value.is_empty() {
        return;
    }
    let Some(top) = labels.get("colors").and_then(|ranked| ranked.first()) else {
        return;
    };
    if top.score < MIN_LABEL_SCORE {
        return;
    }
    let mentions_current = lexicon::tokens(&top.sentence)
        .filter_map(lexicon::color)
        .any(|color| product.colors.value.iter().any(|c| c == color));
    if mentions_current {
        let raised = product
            .colors
            .confidence
            .max(top.score.min(MAX_SUPPLEMENT_CONFIDENCE));
        product.colors.confidence = raised;
    }
}

fn fill_description(product: &mut AnalyzedProduct, labels: &LabelRanking) {
    if !product.description.value.is_empty() {
        return;
    }
    let Some(ranked) = labels.get("product description") else {
        return;
    };
    let picked: Vec<_> = ranked
        .iter()
        .filter(|s| s.score >= MIN_LABEL_SCORE)
        .filter(|s| s.sentence.split_whitespace().count() >= 3)
        .filter(|s| is_valid_description(&s.sentence, &product.name.value))
        .take(MAX_DESCRIPTION_SENTENCES)
        .collect();
    if picked.is_empty() {
        return;
    }
    let text = picked
        .iter()
        .map(|s| format!("{}.", s.sentence.trim_end_matches(['.', '!', '؟', '?'])))
        .collect::<Vec<_>>()
        .join(" ");
    let confidence = picked.iter().map(|s| s.score).sum::<f32>() / picked.len() as f32;
    product.description = AnalyzedField::new(
        text,
        confidence.min(MAX_SUPPLEMENT_CONFIDENCE),
        FieldSource::Zsc,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ScoredSentence;
    use crate::providers::schema::RewritePrice;
    use crate::text::{extract_baseline, normalize};

    const FIXTURE: &str = "طقم نسائي 3 قطع حرير تركي مزين بكريستال\nمقاسات L و XL يلبس من وزن 40 الى 70\nالسعر للشمال 3500";

    fn baseline(text: &str) -> AnalyzedProduct {
        extract_baseline(&normalize(text))
    }

    fn entity(group: &str, word: &str, score: f32) -> Entity {
        Entity {
            group: group.into(),
            word: word.into(),
            score,
            start: 0,
            end: word.chars().count(),
        }
    }

    fn ranking(label: &str, sentences: &[(&str, f32)]) -> LabelRanking {
        let mut ranking = LabelRanking::new();
        ranking.insert(
            label.to_string(),
            sentences
                .iter()
                .map(|(sentence, score)| ScoredSentence {
                    sentence: sentence.to_string(),
                    score: *score,
                })
                .collect(),
        );
        ranking
    }

    fn hostile_rewrite() -> RewriteOutput {
        RewriteOutput {
            name: Some("حذاء رياضي رجالي".into()),
            description: Some("حذاء مريح للمشي اليومي وللرياضة.".into()),
            description_table: Some(vec![
                RewriteRow {
                    key: "material".into(),
                    label: "الخامة".into(),
                    value: "شبك قماشي".into(),
                    confidence: Some(0.99),
                },
                RewriteRow {
                    key: "price".into(),
                    label: "السعر".into(),
                    value: "السعر 99 ريال".into(),
                    confidence: None,
                },
                RewriteRow {
                    key: "material".into(),
                    label: "الخامة".into(),
                    value: "جلد".into(),
                    confidence: None,
                },
            ]),
            tags: Some(vec!["حذاء".into(), "رياضة".into()]),
            sizes: Some(vec!["42".into(), "43".into()]),
            colors: Some(vec!["أزرق".into()]),
            price_range: Some(RewritePrice {
                low: 99.0,
                high: 120.0,
            }),
            notes: Some("ملاحظة".into()),
            confidence: Some(0.95),
            reasons: None,
        }
    }

    #[test]
    fn no_provider_output_returns_the_baseline() {
        let base = baseline(FIXTURE);
        assert_eq!(merge(&base, ProviderSignals::default()), base);
    }

    #[test]
    fn rewrite_never_touches_strong_fields() {
        let base = baseline(FIXTURE);
        let rewrite = hostile_rewrite();
        let merged = merge(
            &base,
            ProviderSignals {
                rewrite: Some(&rewrite),
                ..Default::default()
            },
        );
        assert!(!base.name.is_weak());
        assert_eq!(merged.name, base.name);
        assert_eq!(merged.price_range, base.price_range);
        assert_eq!(merged.sizes, base.sizes);
        assert!(merged.satisfies_schema());
    }

    #[test]
    fn rewrite_fills_weak_fields_with_capped_confidence() {
        let base = baseline("شي جميل جدا");
        let rewrite = hostile_rewrite();
        let merged = merge(
            &base,
            ProviderSignals {
                rewrite: Some(&rewrite),
                ..Default::default()
            },
        );
        assert_eq!(merged.name.value, "حذاء رياضي رجالي");
        assert_eq!(merged.name.source, FieldSource::Llm);
        assert_eq!(merged.name.confidence, MAX_LLM_CONFIDENCE);
        assert_eq!(merged.colors.value, vec!["أزرق".to_string()]);
        assert_eq!(merged.price_range.value.low, 99.0);
        assert_eq!(merged.price_range.confidence, MAX_LLM_PRICE_CONFIDENCE);
        assert_eq!(merged.notes.value, "ملاحظة");
    }

    #[test]
    fn rewrite_values_breaking_field_rules_are_ignored() {
        let base = baseline("شي جميل جدا");
        let rewrite = RewriteOutput {
            name: Some("فستان 3500 احجزي".into()),
            description: Some("فستان بمقاسات L و XL بسعر 3500 ريال".into()),
            colors: Some(vec!["لون القمر".into()]),
            tags: Some(vec!["جديد".into(), "فخم".into()]),
            confidence: None,
            ..Default::default()
        };
        let merged = merge(
            &base,
            ProviderSignals {
                rewrite: Some(&rewrite),
                ..Default::default()
            },
        );
        assert_eq!(merged.name, base.name);
        assert_eq!(merged.description, base.description);
        assert_eq!(merged.colors, base.colors);
        assert_eq!(merged.tags, base.tags);
    }

    #[test]
    fn baseline_price_wins_over_rewrite() {
        let base = baseline("فستان سهرة\nالسعر 150");
        let rewrite = hostile_rewrite();
        let merged = merge(
            &base,
            ProviderSignals {
                rewrite: Some(&rewrite),
                ..Default::default()
            },
        );
        assert_eq!(merged.price_range.value.low, 150.0);
        assert_eq!(merged.price_range.source, FieldSource::Rule);
    }

    #[test]
    fn tag_conflicts_prefer_higher_confidence_then_entities() {
        let entities = vec![entity("MISC", "حرير", 0.7), entity("ORG", "زارا", 0.8)];
        let labels = ranking("material", &[("قماش حرير ناعم", 0.7), ("صوف دافئ", 0.85)]);
        let candidates = tag_candidates(Some(&entities), Some(&labels));
        let silk = candidates.iter().find(|c| c.tag == "حرير").unwrap();
        assert_eq!(silk.source, FieldSource::Ner);
        assert_eq!(candidates[0].tag, "صوف");
        assert_eq!(candidates[0].source, FieldSource::Zsc);

        let stronger = ranking("material", &[("قماش حرير ناعم", 0.75)]);
        let candidates = tag_candidates(Some(&entities), Some(&stronger));
        let silk = candidates.iter().find(|c| c.tag == "حرير").unwrap();
        assert_eq!(silk.source, FieldSource::Zsc);
    }

    #[test]
    fn supplements_append_without_replacing() {
        let base = baseline(FIXTURE);
        let entities = vec![
            entity("ORG", "زارا", 0.9),
            entity("PERS", "سارة", 0.99),
            entity("LOC", "تركيا", 0.4),
        ];
        let merged = merge(
            &base,
            ProviderSignals {
                entities: Some(&entities),
                ..Default::default()
            },
        );
        assert_eq!(&merged.tags.value[..base.tags.value.len()], &base.tags.value[..]);
        assert!(merged.tags.value.contains(&"زارا".to_string()));
        assert!(!merged.tags.value.contains(&"سارة".to_string()));
        assert!(!merged.tags.value.contains(&"تركيا".to_string()));
        assert!(merged.tags.value.len() <= MAX_TAGS);
        assert_eq!(merged.tags.source, base.tags.source);
        assert_eq!(merged.name, base.name);
        assert_eq!(merged.price_range, base.price_range);
    }

    #[test]
    fn supplements_source_empty_tags() {
        let base = AnalyzedProduct::empty();
        let entities = vec![entity("ORG", "زارا", 0.8)];
        let merged = merge(
            &base,
            ProviderSignals {
                entities: Some(&entities),
                ..Default::default()
            },
        );
        assert_eq!(merged.tags.value, vec!["زارا".to_string()]);
        assert_eq!(merged.tags.source, FieldSource::Ner);
        assert_eq!(merged.tags.confidence, 0.8);
    }

    #[test]
    fn zero_shot_corroborates_colors() {
        let base = baseline("فستان سهرة باللون الأسود");
        let labels = ranking("colors", &[("فستان سهرة باللون الأسود", 0.97)]);
        let merged = merge(
            &base,
            ProviderSignals {
                labels: Some(&labels),
                ..Default::default()
            },
        );
        assert_eq!(merged.colors.value, base.colors.value);
        assert_eq!(merged.colors.confidence, MAX_SUPPLEMENT_CONFIDENCE);
    }

    #[test]
    fn zero_shot_fills_only_an_empty_description() {
        let base = baseline("فستان سهرة\nالسعر للشمال 3500");
        assert!(base.description.value.is_empty());
        let labels = ranking(
            "product description",
            &[("قماش ناعم يناسب المناسبات", 0.8), ("السعر للشمال 3500", 0.9)],
        );
        let merged = merge(
            &base,
            ProviderSignals {
                labels: Some(&labels),
                ..Default::default()
            },
        );
        assert_eq!(merged.description.value, "قماش ناعم يناسب المناسبات.");
        assert_eq!(merged.description.source, FieldSource::Zsc);

        let described = baseline(
            "درع فاخر بتصميم مميز\nخامة شيفون طايح بلمسة مخملية\nالسعر قديم 5000",
        );
        let merged = merge(
            &described,
            ProviderSignals {
                labels: Some(&labels),
                ..Default::default()
            },
        );
        assert_eq!(merged.description, described.description);
    }

    #[test]
    fn rewrite_table_fills_only_a_weak_table() {
        let rewrite = hostile_rewrite();
        let signals = ProviderSignals {
            rewrite: Some(&rewrite),
            ..Default::default()
        };

        let base = baseline("شي جميل جدا");
        assert!(base.description_table.is_weak());
        let merged = merge(&base, signals);
        let table = &merged.description_table;
        assert_eq!(table.source, FieldSource::Llm);
        assert_eq!(table.value.len(), 1);
        assert_eq!(table.value[0].value, "شبك قماشي");
        assert_eq!(table.value[0].confidence, MAX_LLM_CONFIDENCE);

        let strong = baseline(FIXTURE);
        assert!(!strong.description_table.is_weak());
        assert_eq!(merge(&strong, signals).description_table, strong.description_table);
    }

    #[test]
    fn rewrite_description_may_not_restate_the_name() {
        let base = baseline("شي جميل جدا");
        let rewrite = RewriteOutput {
            name: Some("عباية سوداء مطرزة".into()),
            description: Some("عباية سوداء مطرزة بخيوط ذهبية ناعمة".into()),
            ..Default::default()
        };
        let merged = merge(
            &base,
            ProviderSignals {
                rewrite: Some(&rewrite),
                ..Default::default()
            },
        );
        assert_eq!(merged.name.value, "عباية سوداء مطرزة");
        assert_eq!(merged.description, base.description);
        assert!(!is_valid_description("عباية سوداء", "عباية سوداء مطرزة"));
        assert!(is_valid_description("قماش ناعم ومريح للسهرات", "عباية سوداء مطرزة"));
    }
}
