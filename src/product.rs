use serde::{Deserialize, Serialize};

/// Confidence below which a field is considered weak and open to provider rewrites.
pub const WEAK_THRESHOLD: f32 = 0.6;

pub const MAX_NAME_CHARS: usize = 60;
pub const MAX_DESCRIPTION_SENTENCES: usize = 3;
pub const MAX_SIZES: usize = 20;
pub const MAX_TAGS: usize = 6;
pub const MAX_TABLE_ROWS: usize = 12;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldSource {
    Rule,
    Ner,
    Zsc,
    Llm,
}

impl FieldSource {
    /// Lower value wins when two suggestions tie on confidence.
    pub fn priority(&self) -> u8 {
        match self {
            FieldSource::Rule => 0,
            FieldSource::Llm => 1,
            FieldSource::Ner => 2,
            FieldSource::Zsc => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzedField<T> {
    pub value: T,
    pub confidence: f32,
    pub source: FieldSource,
}

impl<T> AnalyzedField<T> {
    pub fn new(value: T, confidence: f32, source: FieldSource) -> Self {
        Self {
            value,
            confidence: clamp_confidence(confidence),
            source,
        }
    }

    pub fn rule(value: T, confidence: f32) -> Self {
        Self::new(value, confidence, FieldSource::Rule)
    }

    pub fn is_weak(&self) -> bool {
        self.confidence < WEAK_THRESHOLD
    }
}

impl<T: Default> AnalyzedField<T> {
    pub fn empty() -> Self {
        Self::rule(T::default(), 0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct PriceRange {
    pub low: f64,
    pub high: f64,
}

impl PriceRange {
    pub fn single(value: f64) -> Self {
        Self {
            low: value,
            high: value,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.low <= 0.0 && self.high <= 0.0
    }
}

/// One line of the product details table (`material`, `dimensions`, `component_1`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetailRow {
    pub key: String,
    pub label: String,
    pub value: String,
    pub confidence: f32,
}

impl DetailRow {
    pub fn new(key: impl Into<String>, label: &str, value: impl Into<String>, confidence: f32) -> Self {
        Self {
            key: key.into(),
            label: label.to_string(),
            value: value.into(),
            confidence: clamp_confidence(confidence),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyzedProduct {
    pub name: AnalyzedField<String>,
    pub description: AnalyzedField<String>,
    pub description_table: AnalyzedField<Vec<DetailRow>>,
    pub price_range: AnalyzedField<PriceRange>,
    pub colors: AnalyzedField<Vec<String>>,
    pub sizes: AnalyzedField<Vec<String>>,
    pub tags: AnalyzedField<Vec<String>>,
    pub notes: AnalyzedField<String>,
}

impl Default for AnalyzedProduct {
    fn default() -> Self {
        Self::empty()
    }
}

impl AnalyzedProduct {
    /// Draft returned for empty input: every field present, nothing extracted.
    pub fn empty() -> Self {
        Self {
            name: AnalyzedField::empty(),
            description: AnalyzedField::empty(),
            description_table: AnalyzedField::empty(),
            price_range: AnalyzedField::empty(),
            colors: AnalyzedField::empty(),
            sizes: AnalyzedField::empty(),
            tags: AnalyzedField::empty(),
            notes: AnalyzedField::empty(),
        }
    }

    /// Names of fields below [`WEAK_THRESHOLD`], in schema order.
    pub fn weak_fields(&self) -> Vec<&'static str> {
        let mut weak = Vec::new();
        if self.name.is_weak() {
            weak.push("name");
        }
        if self.description.is_weak() {
            weak.push("description");
        }
        if self.description_table.is_weak() {
            weak.push("description_table");
        }
        if self.price_range.is_weak() {
            weak.push("price_range");
        }
        if self.colors.is_weak() {
            weak.push("colors");
        }
        if self.sizes.is_weak() {
            weak.push("sizes");
        }
        if self.tags.is_weak() {
            weak.push("tags");
        }
        weak
    }

    pub fn confidences(&self) -> [f32; 8] {
        [
            self.name.confidence,
            self.description.confidence,
            self.description_table.confidence,
            self.price_range.confidence,
            self.colors.confidence,
            self.sizes.confidence,
            self.tags.confidence,
            self.notes.confidence,
        ]
    }

    /// Holds for every value the pipeline hands out.
    pub fn satisfies_schema(&self) -> bool {
        self.confidences()
            .iter()
            .all(|c| c.is_finite() && (0.0..=1.0).contains(c))
            && self.name.value.chars().count() <= MAX_NAME_CHARS
            && self.sizes.value.len() <= MAX_SIZES
            && self.tags.value.len() <= MAX_TAGS
            && self.description_table.value.len() <= MAX_TABLE_ROWS
            && self
                .description_table
                .value
                .iter()
                .all(|row| (0.0..=1.0).contains(&row.confidence) && !row.value.is_empty())
            && self.price_range.value.low >= 0.0
            && self.price_range.value.high >= self.price_range.value.low
    }
}

pub fn clamp_confidence(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
