use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub const MAX_SENTENCES: usize = 30;

const ARABIC_THOUSANDS: char = '\u{066C}';
const ARABIC_DECIMAL: char = '\u{066B}';

static HTML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").unwrap());
static HORIZONTAL_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());
static SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?؟؛]+(?:\s+|$)").unwrap());

/// Merchant text after digit, symbol and whitespace cleanup.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NormalizedText {
    #[serde(skip_serializing)]
    pub original: String,
    /// Cleaned text, one segment per line.
    pub text: String,
    /// Non-empty segments in input order.
    pub lines: Vec<String>,
    /// Sentence split of `lines`, capped at [`MAX_SENTENCES`].
    pub sentences: Vec<String>,
}

impl NormalizedText {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

pub fn normalize(text: &str) -> NormalizedText {
    let without_tags = HTML_TAG.replace_all(text, " ");
    let chars: Vec<char> = without_tags.chars().collect();
    let mut cleaned = String::with_capacity(without_tags.len());
    for (index, &ch) in chars.iter().enumerate() {
        match ch {
            '\r' => {}
            '*' => cleaned.push('\n'),
            ARABIC_THOUSANDS => cleaned.push(','),
            ARABIC_DECIMAL => cleaned.push('.'),
            '\u{00A0}' | '\u{202F}' if is_thousands_gap(&chars, index) => cleaned.push(','),
            ch if is_dropped(ch) => cleaned.push(' '),
            '\u{0640}' => {}
            ch => cleaned.push(ascii_digit(ch).unwrap_or(ch)),
        }
    }

    let lines: Vec<String> = cleaned
        .split('\n')
        .map(|line| HORIZONTAL_SPACE.replace_all(line, " ").trim().to_string())
        .filter(|line| line.chars().any(|c| c.is_alphanumeric()))
        .collect();

    let sentences = split_sentences(&lines);

    NormalizedText {
        original: text.to_string(),
        text: lines.join("\n"),
        lines,
        sentences,
    }
}

/// Arabic-Indic and Extended Arabic-Indic digits to ASCII.
pub fn ascii_digit(ch: char) -> Option<char> {
    let offset = match ch {
        '\u{0660}'..='\u{0669}' => ch as u32 - 0x0660,
        '\u{06F0}'..='\u{06F9}' => ch as u32 - 0x06F0,
        _ => return None,
    };
    char::from_digit(offset, 10)
}

pub fn normalize_digits(text: &str) -> String {
    text.chars().map(|c| ascii_digit(c).unwrap_or(c)).collect()
}

fn is_any_digit(ch: char) -> bool {
    ch.is_ascii_digit() || ascii_digit(ch).is_some()
}

/// A no-break space between a digit and exactly three more digits groups thousands (1 299).
fn is_thousands_gap(chars: &[char], index: usize) -> bool {
    let before = index.checked_sub(1).and_then(|i| chars.get(i));
    let group = chars.get(index + 1..index + 4);
    before.is_some_and(|c| is_any_digit(*c))
        && group.is_some_and(|g| g.iter().all(|c| is_any_digit(*c)))
        && !chars.get(index + 4).is_some_and(|c| is_any_digit(*c))
}

fn split_sentences(lines: &[String]) -> Vec<String> {
    let mut sentences = Vec::new();
    for line in lines {
        for part in SENTENCE_END.split(line) {
            let part = part.trim();
            if part.chars().any(|c| c.is_alphanumeric()) {
                sentences.push(part.to_string());
                if sentences.len() == MAX_SENTENCES {
                    return sentences;
                }
            }
        }
    }
    sentences
}

fn is_dropped(ch: char) -> bool {
    matches!(ch as u32,
        0x1F000..=0x1FAFF
        | 0x2600..=0x27BF
        | 0x2B00..=0x2BFF
        | 0xFE00..=0xFE0F
        | 0x200B..=0x200D
        | 0x2060
        | 0xFEFF
        | 0x20E3
        | 0xE0020..=0xE007F
    ) || ch == '\t'
}
