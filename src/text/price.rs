//! Price candidates and the old/new currency selection policy.

use crate::product::PriceRange;
use crate::text::lexicon::{self, fold};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Numbers below this are sizes, weights or quantities unless nothing else exists.
pub const MIN_PRICE: f64 = 80.0;

/// Largest character gap between a currency marker and the number it labels.
const MARKER_REACH: usize = 24;

static PRICE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)سعر|[اأ]سعار|\bprice").unwrap());

static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d{1,2})?|\d+(?:\.\d{1,2})?").unwrap()
});

static OLD_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"قديم\p{L}*|شمال\p{L}*").unwrap());

static NEW_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"جديد\p{L}*|جنوب\p{L}*").unwrap());

static FOREIGN_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)سعود\p{L}*|درهم|دولار|ر\.س|\$|\bsar\b|\baed\b|\busd\b|\bkwd\b").unwrap()
});

static CONTEXT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)سعر|ريال|فقط\s*ب|\bprice\b").unwrap());

const MEASURE_WORDS: &[&str] = &[
    "طول", "عرض", "ارتفاع", "سم", "cm", "مم", "mm", "جرام", "غرام", "جم", "مل", "ml", "كيلو",
    "كجم", "كغ", "kg", "وزن", "لتر", "انش", "inch", "واط", "وات", "متر", "كميه", "مخزون",
    "قطعه", "قطع", "حبه", "حبات", "stock", "qty", "عدد", "ابو", "مقاس", "مقاسات",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceKind {
    /// Old currency or "north" price; the preferred listing price.
    Old,
    /// Next to a generic price word such as السعر or ريال.
    Contextual,
    /// New currency or "south" price.
    New,
    /// A number without any marker.
    Bare,
    /// Saudi riyal and other foreign currencies, never the listing price.
    Foreign,
}

impl PriceKind {
    pub fn confidence(&self) -> f32 {
        match self {
            PriceKind::Old => 0.85,
            PriceKind::Contextual => 0.75,
            PriceKind::New => 0.6,
            PriceKind::Bare => 0.45,
            PriceKind::Foreign => 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceCandidate {
    pub value: f64,
    pub kind: PriceKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceDetection {
    pub range: Option<PriceRange>,
    pub kind: Option<PriceKind>,
    pub confidence: f32,
    pub last_resort: bool,
    pub candidates: Vec<PriceCandidate>,
}

impl PriceDetection {
    fn none(candidates: Vec<PriceCandidate>) -> Self {
        Self {
            range: None,
            kind: None,
            confidence: 0.0,
            last_resort: false,
            candidates,
        }
    }
}

pub const LAST_RESORT_CONFIDENCE: f32 = 0.3;

pub fn detect(lines: &[String]) -> PriceDetection {
    let mut candidates = Vec::new();
    let mut numbers_seen = 0usize;
    for line in lines {
        let (found, seen) = scan_segment(line);
        candidates.extend(found);
        numbers_seen += seen;
    }

    for kind in [
        PriceKind::Old,
        PriceKind::Contextual,
        PriceKind::New,
        PriceKind::Bare,
    ] {
        let values: Vec<f64> = candidates
            .iter()
            .filter(|c| c.kind == kind && c.value >= MIN_PRICE)
            .map(|c| c.value)
            .collect();
        let Some(first) = values.first().copied() else {
            continue;
        };
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let low = if kind == PriceKind::Old { first } else { min };
        return PriceDetection {
            range: Some(PriceRange { low, high: max }),
            kind: Some(kind),
            confidence: kind.confidence(),
            last_resort: false,
            candidates,
        };
    }

    if numbers_seen == 1
        && let Some(only) = candidates.first().copied()
        && only.kind != PriceKind::Foreign
    {
        return PriceDetection {
            range: Some(PriceRange::single(only.value)),
            kind: Some(only.kind),
            confidence: LAST_RESORT_CONFIDENCE,
            last_resort: true,
            candidates,
        };
    }

    PriceDetection::none(candidates)
}

/// True for a price heading or a segment with both a price marker and a number.
pub fn is_price_segment(segment: &str) -> bool {
    let marked = OLD_MARKER.is_match(segment)
        || NEW_MARKER.is_match(segment)
        || FOREIGN_MARKER.is_match(segment)
        || CONTEXT_MARKER.is_match(segment);
    (marked && NUMBER.is_match(segment)) || PRICE_HEADING.is_match(segment)
}

/// Candidates in one segment plus the count of numbers seen (including excluded ones).
fn scan_segment(segment: &str) -> (Vec<PriceCandidate>, usize) {
    let mut markers: Vec<(usize, usize, PriceKind)> = Vec::new();
    for (regex, kind) in [
        (&*OLD_MARKER, PriceKind::Old),
        (&*NEW_MARKER, PriceKind::New),
        (&*FOREIGN_MARKER, PriceKind::Foreign),
    ] {
        markers.extend(regex.find_iter(segment).map(|m| (m.start(), m.end(), kind)));
    }
    let contextual = CONTEXT_MARKER.is_match(segment);
    let measured = lexicon::tokens(segment).any(is_measure_word)
        || lexicon::tokens(segment).any(lexicon::is_size_anchor);

    let mut candidates = Vec::new();
    let mut seen = 0usize;
    for m in NUMBER.find_iter(segment) {
        if glued_to_latin(segment, m.start(), m.end()) {
            continue;
        }
        seen += 1;
        let raw: String = m.as_str().chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
        let Ok(value) = raw.parse::<f64>() else {
            continue;
        };
        if raw.split('.').next().map(str::len).unwrap_or(0) >= 8 {
            continue;
        }
        if adjacent_measure(segment, m.start(), m.end()) {
            continue;
        }
        let kind = match nearest_marker(segment, &markers, m.start(), m.end()) {
            Some(kind) => kind,
            None if contextual => PriceKind::Contextual,
            None if measured => continue,
            None => PriceKind::Bare,
        };
        candidates.push(PriceCandidate { value, kind });
    }
    (candidates, seen)
}

fn nearest_marker(
    segment: &str,
    markers: &[(usize, usize, PriceKind)],
    start: usize,
    end: usize,
) -> Option<PriceKind> {
    markers
        .iter()
        .filter_map(|(m_start, m_end, kind)| {
            let (gap, after) = if *m_end <= start {
                (segment[*m_end..start].chars().count(), false)
            } else if *m_start >= end {
                (segment[end..*m_start].chars().count(), true)
            } else {
                return None;
            };
            (gap <= MARKER_REACH).then_some((gap, after, *kind))
        })
        .min_by_key(|(gap, after, _)| (*gap, *after))
        .map(|(_, _, kind)| kind)
}

fn glued_to_latin(segment: &str, start: usize, end: usize) -> bool {
    let before = segment[..start].chars().next_back();
    let after = segment[end..].chars().next();
    before.is_some_and(|c| c.is_ascii_alphabetic()) || after.is_some_and(|c| c.is_ascii_alphabetic())
}

fn adjacent_measure(segment: &str, start: usize, end: usize) -> bool {
    let previous = lexicon::tokens(&segment[..start]).last();
    let next = lexicon::tokens(&segment[end..]).next();
    previous.is_some_and(is_measure_word) || next.is_some_and(is_measure_word)
}

fn is_measure_word(token: &str) -> bool {
    lexicon::stem_candidates(token)
        .iter()
        .any(|stem| MEASURE_WORDS.iter().any(|w| fold(w) == *stem))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::normalize::normalize;

    fn low(text: &str) -> Option<f64> {
        detect(&normalize(text).lines).range.map(|r| r.low)
    }

    #[test]
    fn north_price_beats_south() {
        let text = "السعر للشمال 9500 ريال فقط\nالسعر للجنوب 31000 ريال فقط";
        let detection = detect(&normalize(text).lines);
        assert_eq!(detection.kind, Some(PriceKind::Old));
        assert_eq!(detection.range.unwrap().low, 9500.0);
    }

    #[test]
    fn old_currency_beats_south_and_saudi() {
        let text = "الأسعار\n- السعر بالعملة القديمة: 5000\n- السعر بالريال الجنوبي:  16000\n- السعر بالريال السعودي: 36";
        assert_eq!(low(text), Some(5000.0));
    }

    #[test]
    fn first_old_price_is_low_and_the_second_widens_the_range() {
        let text = "💰السعر عمله قديم 4500\n💰السعر عمله قديم 15000\n💰السعر عمله سعودي32ريال\nتلبس من 40إلى وزن 90بالراحه";
        let detection = detect(&normalize(text).lines);
        let range = detection.range.unwrap();
        assert_eq!(range.low, 4500.0);
        assert_eq!(range.high, 15000.0);
    }

    #[test]
    fn marker_after_the_number_counts() {
        let text = "السعر 6000 عمله قديمه\nالسعر 19000عمله جديده\nالسعر43 ريال سعودي\nالطول 240\nالعرض 220";
        assert_eq!(low(text), Some(6000.0));
    }

    #[test]
    fn contextual_price_when_no_currency_marker() {
        let text = "شماعة ملابس مبخرة 2×1 ابو 4 ارجل\nفقط ب 4000 ريال\nفقط ب 29 ريال سعودي";
        let detection = detect(&normalize(text).lines);
        assert_eq!(detection.kind, Some(PriceKind::Contextual));
        assert_eq!(detection.range.unwrap().low, 4000.0);
    }

    #[test]
    fn numbers_glued_to_latin_letters_are_ignored() {
        let text = "كريم S88 توتال 35 جرام\nباالعمله القديمه 4000ريال\nباالعمله الجديده 12000ريال";
        assert_eq!(low(text), Some(4000.0));
    }

    #[test]
    fn digit_scripts_agree() {
        assert_eq!(low("السعر ٣٥٠٠"), Some(3500.0));
        assert_eq!(low("السعر 3500"), Some(3500.0));
    }

    #[test]
    fn small_number_is_last_resort_only_when_alone() {
        let alone = detect(&normalize("السعر 40").lines);
        assert!(alone.last_resort);
        assert_eq!(alone.range.unwrap().low, 40.0);
        assert_eq!(alone.confidence, LAST_RESORT_CONFIDENCE);

        assert_eq!(low("مقاس 40 و 42"), None);
        assert_eq!(low("فستان 40 قطعة 3"), None);
    }

    #[test]
    fn measurements_and_phone_numbers_are_not_prices() {
        assert_eq!(low("الطول 240\nالعرض 220"), None);
        assert_eq!(low("للتواصل 777123456"), None);
    }

    #[test]
    fn thousands_separators() {
        assert_eq!(low("السعر 1,299 ريال"), Some(1299.0));
        assert_eq!(low("السعر ٣٬٥٠٠ ريال"), Some(3500.0));
        assert_eq!(low("السعر 3,500 ريال"), Some(3500.0));
        let nbsp = detect(&normalize("السعر 1\u{00A0}299").lines).range.unwrap();
        assert_eq!((nbsp.low, nbsp.high), (1299.0, 1299.0));
    }

    #[test]
    fn arabic_decimal_separator() {
        assert_eq!(low("السعر ١٢٩٩٫٥٠ ريال"), Some(1299.5));
    }

    #[test]
    fn lone_foreign_price_is_not_a_last_resort() {
        let detection = detect(&normalize("فستان سهرة\nالسعر 150 ريال سعودي").lines);
        assert_eq!(detection.range, None);
        assert!(!detection.last_resort);
        assert_eq!(detection.candidates[0].kind, PriceKind::Foreign);
    }

    #[test]
    fn price_segments_are_recognised() {
        assert!(is_price_segment("السعر للشمال 3500"));
        assert!(!is_price_segment("مقاسات L و XL"));
    }
}
