//! Deterministic baseline extraction. Every field is computed independently and falls back to
//! its empty value, so a miss in one never affects another.

use crate::product::{
    AnalyzedField, AnalyzedProduct, DetailRow, MAX_DESCRIPTION_SENTENCES, MAX_NAME_CHARS,
    MAX_SIZES, MAX_TABLE_ROWS, MAX_TAGS, PriceRange,
};
use crate::text::lexicon::{self, fold};
use crate::text::normalize::NormalizedText;
use crate::text::price::{self, PriceDetection, PriceKind};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Segments looked at when choosing a name.
const NAME_WINDOW: usize = 8;
const MAX_DESCRIPTION_CHARS: usize = 400;

static LETTER_SIZE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:(?i:x{1,3}l|x{1,2}s|[2-5]xl)|S|M|L)\b").unwrap());

static FREE_SIZE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)فري\s*سايز|free\s*size").unwrap());

static WEIGHT_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:من\s*)?(?:وزن\s*)?(\d{2,3})\s*(?:كيلو|كجم|كغ)?\s*(?:حتى|الى|إلى|الي|لين)\s*(?:وزن\s*)?(\d{2,3})",
    )
    .unwrap()
});

static WEIGHT_CONTEXT: Lazy<Regex> = Lazy::new(|| Regex::new(r"وزن|يلبس|تلبس|يناسب").unwrap());

static TWO_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{2}\b").unwrap());

static DIMENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:ال)?(طول|عرض|ارتفاع|عمق)\s*:?\s*(\d+(?:\.\d+)?)\s*(سم|cm|مم|mm|متر)?").unwrap()
});

/// `1 فراش`, `2وسادة`: a quantity followed by an item name and nothing else.
static COMPONENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})\s*(\p{L}[\p{L}\s]{1,60})$").unwrap());

static PLURAL_COLORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"لونين|لونان|\d+\s*[اأ]?ل+وان").unwrap());

pub const NOTE_PLURAL_COLORS: &str =
    "ذُكر وجود عدة ألوان دون تسميتها؛ يُفضّل تسمية الألوان وربط الصور بها.";
pub const NOTE_LAST_RESORT_PRICE: &str = "السعر مأخوذ من الرقم الوحيد في النص وقد لا يكون سعراً.";
pub const NOTE_MULTIPLE_OLD_PRICES: &str =
    "ذُكر أكثر من سعر بالعملة القديمة؛ اعتُمد الأول كحد أدنى.";

pub fn extract_baseline(normalized: &NormalizedText) -> AnalyzedProduct {
    if normalized.is_empty() {
        return AnalyzedProduct::empty();
    }
    let lines = &normalized.lines;
    let detection = price::detect(lines);
    let name = extract_name(lines);
    let description = extract_description(lines, name.index, &name.value);
    let sizes = extract_sizes(lines);
    let colors = extract_colors(lines);
    let tags = extract_tags(lines);
    let notes = extract_notes(normalized, &detection);
    let description_table = extract_table(lines, &sizes, &colors);

    AnalyzedProduct {
        name: AnalyzedField::rule(name.value, name.confidence),
        description,
        description_table,
        price_range: price_field(&detection),
        colors,
        sizes,
        tags,
        notes,
    }
}

fn price_field(detection: &PriceDetection) -> AnalyzedField<PriceRange> {
    match detection.range {
        Some(range) => AnalyzedField::rule(range, detection.confidence),
        None => AnalyzedField::empty(),
    }
}

struct NameChoice {
    value: String,
    confidence: f32,
    index: Option<usize>,
}

fn extract_name(lines: &[String]) -> NameChoice {
    let mut first_substantive: Option<(usize, String)> = None;
    for (index, line) in lines.iter().enumerate().take(NAME_WINDOW) {
        if !is_name_candidate(line) {
            continue;
        }
        let cleaned = clean_name(line);
        let words: Vec<&str> = cleaned.split(' ').filter(|w| !w.is_empty()).collect();
        let content_words = words
            .iter()
            .filter(|w| w.chars().filter(|c| c.is_alphabetic()).count() >= 3 && !lexicon::is_generic(w))
            .count();
        if words.len() < 2 || content_words == 0 {
            continue;
        }
        if words.iter().any(|w| lexicon::product_type(w).is_some()) {
            return NameChoice {
                value: cleaned,
                confidence: 0.8,
                index: Some(index),
            };
        }
        if first_substantive.is_none() {
            first_substantive = Some((index, cleaned));
        }
    }
    match first_substantive {
        Some((index, value)) => NameChoice {
            value,
            confidence: 0.5,
            index: Some(index),
        },
        None => NameChoice {
            value: String::new(),
            confidence: 0.0,
            index: None,
        },
    }
}

fn is_name_candidate(line: &str) -> bool {
    !price::is_price_segment(line)
        && !lexicon::tokens(line).any(|t| lexicon::is_size_anchor(t) || lexicon::is_logistics(t))
}

/// Symbols, marketing noise and elongations removed; cut at the first call to action.
pub fn clean_name(segment: &str) -> String {
    let words = clean_words(segment);
    let mut kept: Vec<String> = Vec::new();
    for (idx, word) in words.iter().enumerate() {
        if starts_call_to_action(&words, idx) {
            break;
        }
        if lexicon::is_marketing_noise(word) {
            continue;
        }
        if kept.last().is_some_and(|prev| fold(prev) == fold(word)) {
            continue;
        }
        kept.push(word.clone());
    }
    truncate_words(&kept, MAX_NAME_CHARS)
}

fn starts_call_to_action(words: &[String], idx: usize) -> bool {
    if lexicon::is_call_to_action(&words[idx]) {
        return true;
    }
    let Some(next) = words.get(idx + 1) else {
        return false;
    };
    let pair = format!("{} {}", fold(&words[idx]), fold(next));
    lexicon::CALL_TO_ACTION_PHRASES
        .iter()
        .any(|phrase| pair.starts_with(&fold(phrase)))
}

fn clean_words(segment: &str) -> Vec<String> {
    segment
        .split_whitespace()
        .map(|raw| {
            let kept: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
            collapse_elongation(&kept)
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Runs of three or more identical letters shrink to one (فخخخمه -> فخمه).
fn collapse_elongation(word: &str) -> String {
    let chars: Vec<char> = word.chars().collect();
    let mut out = String::with_capacity(word.len());
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let run = chars[i..].iter().take_while(|c| **c == ch).count();
        if run >= 3 && ch.is_alphabetic() {
            out.push(ch);
        } else {
            out.extend(std::iter::repeat_n(ch, run));
        }
        i += run;
    }
    out
}

fn truncate_words(words: &[String], max_chars: usize) -> String {
    let mut out = String::new();
    for word in words {
        let extra = if out.is_empty() { 0 } else { 1 } + word.chars().count();
        if out.chars().count() + extra > max_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

fn extract_description(
    lines: &[String],
    name_index: Option<usize>,
    name: &str,
) -> AnalyzedField<String> {
    let folded_name = fold(name);
    let mut sentences: Vec<String> = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        if Some(index) == name_index || !is_description_candidate(line) {
            continue;
        }
        let words: Vec<String> = clean_words(line)
            .into_iter()
            .filter(|w| !lexicon::is_marketing_noise(w))
            .collect();
        if words.len() < 3 || words.iter().all(|w| lexicon::is_generic(w) || lexicon::is_stop_word(w)) {
            continue;
        }
        let sentence = words.join(" ");
        let folded = fold(&sentence);
        if !folded_name.is_empty() && (folded_name.contains(&folded) || folded.contains(&folded_name)) {
            continue;
        }
        sentences.push(sentence);
        if sentences.len() == MAX_DESCRIPTION_SENTENCES {
            break;
        }
    }

    let confidence = match sentences.len() {
        0 => 0.0,
        1 => 0.35,
        2 => 0.45,
        _ => 0.55,
    };
    let mut text = String::new();
    for sentence in &sentences {
        if text.chars().count() + sentence.chars().count() + 2 > MAX_DESCRIPTION_CHARS {
            break;
        }
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(sentence);
        text.push('.');
    }
    AnalyzedField::rule(text, confidence)
}

/// Details table: dimensions, materials, decoration, listed components, audience, then the
/// sizes and colors already extracted.
fn extract_table(
    lines: &[String],
    sizes: &AnalyzedField<Vec<String>>,
    colors: &AnalyzedField<Vec<String>>,
) -> AnalyzedField<Vec<DetailRow>> {
    let mut dimensions: Vec<String> = Vec::new();
    let mut materials: Vec<&'static str> = Vec::new();
    let mut decorations: Vec<&'static str> = Vec::new();
    let mut components: Vec<String> = Vec::new();
    let mut audience: Option<&'static str> = None;

    for line in lines {
        for caps in DIMENSION.captures_iter(line) {
            let mut entry = format!("ال{} {}", &caps[1], &caps[2]);
            if let Some(unit) = caps.get(3) {
                entry.push(' ');
                entry.push_str(unit.as_str());
            }
            if !dimensions.contains(&entry) {
                dimensions.push(entry);
            }
        }
        for token in lexicon::tokens(line) {
            if let Some(decoration) = lexicon::decoration(token) {
                if !decorations.contains(&decoration) {
                    decorations.push(decoration);
                }
            } else if let Some(material) = lexicon::material(token)
                && !materials.contains(&material)
            {
                materials.push(material);
            }
            audience = audience.or_else(|| lexicon::gender(token));
        }
        if let Some(caps) = COMPONENT.captures(line.trim())
            && !price::is_price_segment(line)
            && !DIMENSION.is_match(line)
            && !lexicon::tokens(line).any(lexicon::is_size_anchor)
        {
            let item = caps[2].split_whitespace().collect::<Vec<_>>().join(" ");
            components.push(format!("{} {}", &caps[1], item));
        }
    }

    let mut rows = Vec::new();
    if !dimensions.is_empty() {
        rows.push(DetailRow::new("dimensions", "الأبعاد", dimensions.join("، "), 0.8));
    }
    if !materials.is_empty() {
        rows.push(DetailRow::new("material", "الخامة", materials.join("، "), 0.7));
    }
    if !decorations.is_empty() {
        rows.push(DetailRow::new("decoration", "الزينة", decorations.join("، "), 0.65));
    }
    for (index, component) in components.into_iter().enumerate() {
        rows.push(DetailRow::new(format!("component_{}", index + 1), "المكونات", component, 0.7));
    }
    if let Some(audience) = audience {
        rows.push(DetailRow::new("audience", "الفئة", audience, 0.7));
    }
    if !sizes.value.is_empty() {
        rows.push(DetailRow::new("sizes", "المقاسات", sizes.value.join("، "), sizes.confidence));
    }
    if !colors.value.is_empty() {
        rows.push(DetailRow::new("colors", "الألوان", colors.value.join("، "), colors.confidence));
    }
    rows.truncate(MAX_TABLE_ROWS);

    let confidence = match rows.len() {
        0 => 0.0,
        1 => 0.4,
        2 => 0.5,
        _ => 0.65,
    };
    AnalyzedField::rule(rows, confidence)
}

fn is_description_candidate(line: &str) -> bool {
    let words: Vec<&str> = lexicon::tokens(line).collect();
    !price::is_price_segment(line)
        && !WEIGHT_RANGE.is_match(line)
        && !LETTER_SIZE.is_match(&size_view(line))
        && !words.iter().any(|w| {
            lexicon::is_size_anchor(w) || lexicon::is_logistics(w) || lexicon::is_call_to_action(w)
        })
}

/// True when the text names a size, a weight range or a size heading.
pub fn mentions_size(text: &str) -> bool {
    LETTER_SIZE.is_match(&size_view(text))
        || FREE_SIZE.is_match(text)
        || (WEIGHT_CONTEXT.is_match(text) && WEIGHT_RANGE.is_match(text))
        || lexicon::tokens(text).any(lexicon::is_size_anchor)
}

/// Punctuation that glues size tokens together (`L_XL`, `XL.L`) replaced by spaces.
fn size_view(line: &str) -> String {
    line.chars()
        .map(|c| if matches!(c, '_' | '/' | '-' | '.' | ',' | '،' | '+') { ' ' } else { c })
        .collect()
}

fn extract_sizes(lines: &[String]) -> AnalyzedField<Vec<String>> {
    let mut sizes: Vec<String> = Vec::new();
    let mut anchored = false;
    let mut push = |sizes: &mut Vec<String>, value: String| {
        if sizes.len() < MAX_SIZES && !sizes.contains(&value) {
            sizes.push(value);
        }
    };

    let anchors: Vec<bool> = lines
        .iter()
        .map(|line| lexicon::tokens(line).any(lexicon::is_size_anchor))
        .collect();

    for (index, line) in lines.iter().enumerate() {
        let view = size_view(line);
        for m in LETTER_SIZE.find_iter(&view) {
            push(&mut sizes, m.as_str().to_uppercase());
        }

        let mut stripped = line.clone();
        if WEIGHT_CONTEXT.is_match(line) {
            for caps in WEIGHT_RANGE.captures_iter(line) {
                let (Some(from), Some(to)) = (caps.get(1), caps.get(2)) else {
                    continue;
                };
                let (Ok(low), Ok(high)) = (from.as_str().parse::<u32>(), to.as_str().parse::<u32>())
                else {
                    continue;
                };
                if (20..=200).contains(&low) && high > low && high <= 250 {
                    anchored = true;
                    push(&mut sizes, format!("فري سايز ({low}–{high} كجم)"));
                }
            }
            stripped = WEIGHT_RANGE.replace_all(line, " ").into_owned();
        }
        if FREE_SIZE.is_match(line) {
            push(&mut sizes, "فري سايز".to_string());
        }

        let follows_anchor = index > 0 && anchors[index - 1] && !price::is_price_segment(line);
        if anchors[index] || follows_anchor {
            anchored = true;
            for m in TWO_DIGITS.find_iter(&stripped) {
                if let Ok(value) = m.as_str().parse::<u32>()
                    && (30..=60).contains(&value)
                {
                    push(&mut sizes, value.to_string());
                }
            }
        }
    }

    let confidence = match (sizes.is_empty(), anchored) {
        (true, _) => 0.0,
        (false, true) => 0.75,
        (false, false) => 0.6,
    };
    AnalyzedField::rule(sizes, confidence)
}

fn extract_colors(lines: &[String]) -> AnalyzedField<Vec<String>> {
    let mut colors: Vec<String> = Vec::new();
    for line in lines {
        let mut previous: Option<&str> = None;
        for token in lexicon::tokens(line) {
            if let Some(color) = lexicon::color(token)
                && !previous.is_some_and(lexicon::is_decor_context)
                && !colors.iter().any(|c| c == color)
            {
                colors.push(color.to_string());
            }
            previous = Some(token);
        }
    }
    let confidence = if colors.is_empty() { 0.0 } else { 0.7 };
    AnalyzedField::rule(colors, confidence)
}

fn extract_tags(lines: &[String]) -> AnalyzedField<Vec<String>> {
    let mut tags: Vec<String> = Vec::new();
    let mut lexicon_hits = 0usize;
    let mut frequency: HashMap<String, (usize, usize, String)> = HashMap::new();
    let mut position = 0usize;

    for line in lines {
        for token in lexicon::tokens(line) {
            position += 1;
            let hit = lexicon::product_type(token)
                .or_else(|| lexicon::material(token))
                .or_else(|| lexicon::gender(token));
            if let Some(display) = hit {
                if !tags.iter().any(|t| fold(t) == fold(display)) {
                    tags.push(display.to_string());
                    lexicon_hits += 1;
                }
                continue;
            }
            if !is_keyword(token) {
                continue;
            }
            let entry = frequency
                .entry(fold(token))
                .or_insert((0, position, token.to_string()));
            entry.0 += 1;
        }
    }

    let mut keywords: Vec<(usize, usize, String)> = frequency
        .into_values()
        .filter(|(count, _, _)| *count >= 2)
        .collect();
    keywords.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    for (_, _, word) in keywords {
        if tags.len() >= MAX_TAGS {
            break;
        }
        if !tags.iter().any(|t| fold(t) == fold(&word)) {
            tags.push(word);
        }
    }
    tags.truncate(MAX_TAGS);

    let confidence = match (tags.is_empty(), lexicon_hits >= 2) {
        (true, _) => 0.0,
        (false, true) => 0.65,
        (false, false) => 0.45,
    };
    AnalyzedField::rule(tags, confidence)
}

/// Content word worth counting as a tag.
pub fn is_keyword(token: &str) -> bool {
    token.chars().count() >= 3
        && token.chars().all(char::is_alphabetic)
        && !lexicon::is_stop_word(token)
        && !lexicon::is_generic(token)
        && !lexicon::is_color(token)
        && !lexicon::is_call_to_action(token)
        && !lexicon::is_size_anchor(token)
        && !lexicon::is_logistics(token)
        && !price::is_price_segment(token)
        && !LETTER_SIZE.is_match(token)
}

fn extract_notes(normalized: &NormalizedText, detection: &PriceDetection) -> AnalyzedField<String> {
    let mut notes: Vec<&str> = Vec::new();
    if PLURAL_COLORS.is_match(&normalized.text) {
        notes.push(NOTE_PLURAL_COLORS);
    }
    if detection.last_resort {
        notes.push(NOTE_LAST_RESORT_PRICE);
    }
    if detection.kind == Some(PriceKind::Old)
        && detection.range.is_some_and(|r| r.high > r.low)
    {
        notes.push(NOTE_MULTIPLE_OLD_PRICES);
    }
    if notes.is_empty() {
        AnalyzedField::empty()
    } else {
        AnalyzedField::rule(notes.join(" "), 0.5)
    }
}
