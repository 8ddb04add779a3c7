//! Vocabularies used by the rule extractor and the merge constraints.
//!
//! Entries are written the way merchants spell them; lookups go through [`fold`] so hamza,
//! alef maqsura and ta marbuta variants all hit the same entry.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Display spellings of known colors; every entry may list extra spellings after the first.
const COLORS: &[&[&str]] = &[
    &["أحمر", "حمراء", "احمر"],
    &["أزرق", "زرقاء"],
    &["أخضر", "خضراء"],
    &["أسود", "سوداء", "اسود"],
    &["أبيض", "بيضاء", "ابيض"],
    &["أصفر", "صفراء"],
    &["بني"],
    &["بيج"],
    &["رمادي", "سكني"],
    &["وردي", "بينك"],
    &["بنفسجي", "موف"],
    &["كحلي"],
    &["سماوي"],
    &["فيروزي"],
    &["عنابي", "نبيتي"],
    &["ذهبي", "دهبي"],
    &["فضي"],
    &["زيتي"],
    &["خمري"],
    &["red"],
    &["blue"],
    &["green"],
    &["black"],
    &["white"],
    &["yellow"],
    &["brown"],
    &["beige"],
    &["gray", "grey"],
    &["pink"],
    &["purple"],
    &["navy"],
    &["turquoise"],
    &["maroon"],
    &["gold"],
    &["silver"],
];

pub const PRODUCT_TYPES: &[&str] = &[
    "طقم", "فستان", "عباية", "عبايات", "درع", "قفطان", "جلابية", "جلابيات", "جاكيت", "جاكت",
    "معطف", "قميص", "بلوزة", "سويتر", "بلوفر", "هودي", "فنيلة", "فنائل", "بنطلون", "تنورة",
    "بيجامة", "شنطة", "حقيبة", "حذاء", "جزمة", "صندل", "ساعة", "عطر", "كريم", "سرير",
    "بطانية", "شماعة", "دفاية", "مفرش", "لحاف", "ستارة", "نظارة", "خاتم", "سلسلة", "اكسسوار",
    "dress", "shirt", "jacket", "coat", "hoodie", "sweater", "blouse", "abaya", "bag", "shoes",
];

pub const MATERIALS: &[&str] = &[
    "حرير", "شيفون", "صوف", "قطن", "جلد", "لينن", "كتان", "دنيم", "جينز", "مخمل", "ساتان",
    "كريب", "تول", "دانتيل", "كريستال", "فرو", "بوليستر", "ليكرا", "مطرز", "تطريز",
    "silk", "chiffon", "wool", "cotton", "leather", "linen", "denim", "velvet", "satin",
];

pub const GENDERS: &[&str] = &[
    "نسائي", "رجالي", "أطفال", "اطفالي", "بناتي", "ولادي", "مواليد", "women", "men", "kids",
];

/// Call-to-action words; a name is cut where the first one starts.
pub const CALL_TO_ACTION: &[&str] = &[
    "احجزي", "احجز", "اطلبي", "اطلب", "اطلبو", "سارعي", "سارع", "اخطفي", "لاتفوت", "لاتفوتي",
    "لايفوتك", "تواصل", "للطلب", "للتواصل", "اتصل", "order", "buy",
];

/// Multi-word call-to-action phrases matched on folded text.
pub const CALL_TO_ACTION_PHRASES: &[&str] = &["لا تفوت", "لا يفوتك", "العرض محدود"];

/// Promotional words that are stripped from names and never become tags.
pub const MARKETING_NOISE: &[&str] = &[
    "لايفوتك", "تخفيض", "خصم", "عرض", "حصري", "مجاني", "شحن", "تحفه", "تحففه", "الترند",
    "ترند", "احلا", "sale", "offer", "free", "amazing", "awesome", "best",
];

/// Words too generic to describe a product as a tag.
pub const GENERIC_TERMS: &[&str] = &[
    "جديد", "جديده", "الجديد", "الموسم", "فخم", "فخمه", "فاخر", "فاخره", "مميز", "مميزه",
    "تميز", "يتميز", "جميل", "جميله", "راقي", "راقيه", "انيق", "انيقه", "افضل", "الافضل",
    "تشكيله", "شكل", "متوفر", "متوفره", "بكميات", "كمية", "بكميه", "الكل", "الجوده", "جوده",
    "عاليه", "تصميم", "بتصميم", "لمسه", "اطلاله", "موديل", "فقط", "premium", "original", "new",
    "quality", "style",
];

pub const STOP_WORDS: &[&str] = &[
    "و", "في", "من", "على", "علي", "الى", "إلى", "الي", "عن", "هو", "هي", "هذا", "هذه", "ذلك",
    "تلك", "مع", "او", "أو", "بي", "لكل", "كل", "حتى", "ثم", "التي", "الذي", "يلبس", "تلبس",
    "داخل", "خارج", "لاي", "لأي", "مكان", "the", "and", "with", "for",
];

/// Segments announcing sizes; numeric sizes are only read next to one of these.
pub const SIZE_ANCHORS: &[&str] = &["المقاسات", "مقاسات", "المقاس", "مقاس", "size", "sizes"];

/// Decoration nouns: a color right after one of these describes trim, not the product.
pub const DECOR_CONTEXT: &[&str] = &[
    "كريستال", "كرستال", "خرز", "تطريز", "مطرز", "زرار", "ازرار", "سحاب", "فصوص", "ترتر",
];

/// Logistics lines that never belong in a description.
pub const LOGISTICS: &[&str] = &["توصيل", "التوصيل", "شحن", "الشحن", "delivery", "shipping"];

/// Removes diacritics and folds letter variants so spellings compare equal.
pub fn fold(input: &str) -> String {
    input
        .chars()
        .filter_map(|ch| match ch {
            '\u{064B}'..='\u{065F}' | '\u{0670}' | '\u{0640}' => None,
            'أ' | 'إ' | 'آ' | 'ٱ' => Some('ا'),
            'ى' => Some('ي'),
            'ة' => Some('ه'),
            'ؤ' => Some('و'),
            'ئ' => Some('ي'),
            ch => Some(ch.to_lowercase().next().unwrap_or(ch)),
        })
        .collect()
}

const PREFIXES: &[&str] = &["وبال", "وال", "بال", "لل", "ال", "و", "ب"];

/// Folded token with common clitic prefixes removed, longest prefix first.
pub fn stem_candidates(token: &str) -> Vec<String> {
    let folded = fold(token);
    let mut out = vec![folded.clone()];
    for prefix in PREFIXES {
        if let Some(rest) = folded.strip_prefix(prefix)
            && rest.chars().count() >= 2
        {
            out.push(rest.to_string());
        }
    }
    out
}

struct FoldedList {
    entries: Vec<(String, &'static str)>,
}

impl FoldedList {
    fn new(words: &'static [&'static str]) -> Self {
        Self {
            entries: words.iter().map(|w| (fold(w), *w)).collect(),
        }
    }

    /// Matches a token against the list allowing up to two trailing letters (plural, feminine).
    fn lookup(&self, token: &str) -> Option<&'static str> {
        for stem in stem_candidates(token) {
            for (key, display) in &self.entries {
                if stem == *key {
                    return Some(*display);
                }
                if let Some(rest) = stem.strip_prefix(key.as_str())
                    && key.chars().count() >= 3
                    && rest.chars().count() <= 2
                {
                    return Some(*display);
                }
            }
        }
        None
    }

    fn contains_exact(&self, token: &str) -> bool {
        stem_candidates(token)
            .iter()
            .any(|stem| self.entries.iter().any(|(key, _)| key == stem))
    }
}

static COLOR_INDEX: Lazy<HashMap<String, &'static str>> = Lazy::new(|| {
    let mut index = HashMap::new();
    for spellings in COLORS {
        let display = spellings[0];
        for spelling in *spellings {
            index.insert(fold(spelling), display);
        }
    }
    index
});

static TYPE_LIST: Lazy<FoldedList> = Lazy::new(|| FoldedList::new(PRODUCT_TYPES));
static MATERIAL_LIST: Lazy<FoldedList> = Lazy::new(|| FoldedList::new(MATERIALS));
static GENDER_LIST: Lazy<FoldedList> = Lazy::new(|| FoldedList::new(GENDERS));
static CTA_LIST: Lazy<FoldedList> = Lazy::new(|| FoldedList::new(CALL_TO_ACTION));
static NOISE_LIST: Lazy<FoldedList> = Lazy::new(|| FoldedList::new(MARKETING_NOISE));
static GENERIC_LIST: Lazy<FoldedList> = Lazy::new(|| FoldedList::new(GENERIC_TERMS));
static STOP_LIST: Lazy<FoldedList> = Lazy::new(|| FoldedList::new(STOP_WORDS));
static ANCHOR_LIST: Lazy<FoldedList> = Lazy::new(|| FoldedList::new(SIZE_ANCHORS));
static DECOR_LIST: Lazy<FoldedList> = Lazy::new(|| FoldedList::new(DECOR_CONTEXT));
static LOGISTICS_LIST: Lazy<FoldedList> = Lazy::new(|| FoldedList::new(LOGISTICS));

/// Canonical display spelling when the token names a color.
pub fn color(token: &str) -> Option<&'static str> {
    stem_candidates(token).iter().find_map(|stem| {
        COLOR_INDEX.get(stem).copied().or_else(|| {
            stem.strip_suffix('ه')
                .and_then(|base| COLOR_INDEX.get(base).copied())
        })
    })
}

pub fn is_color(token: &str) -> bool {
    color(token).is_some()
}

pub fn product_type(token: &str) -> Option<&'static str> {
    TYPE_LIST.lookup(token)
}

pub fn material(token: &str) -> Option<&'static str> {
    MATERIAL_LIST.lookup(token)
}

pub fn gender(token: &str) -> Option<&'static str> {
    GENDER_LIST.lookup(token)
}

pub fn is_call_to_action(token: &str) -> bool {
    CTA_LIST.contains_exact(token)
}

pub fn is_marketing_noise(token: &str) -> bool {
    NOISE_LIST.contains_exact(token)
}

pub fn is_generic(token: &str) -> bool {
    GENERIC_LIST.contains_exact(token) || NOISE_LIST.contains_exact(token)
}

pub fn is_stop_word(token: &str) -> bool {
    let folded = fold(token);
    STOP_LIST.entries.iter().any(|(key, _)| *key == folded)
}

pub fn is_size_anchor(token: &str) -> bool {
    ANCHOR_LIST.lookup(token).is_some()
}

pub fn decoration(token: &str) -> Option<&'static str> {
    DECOR_LIST.lookup(token)
}

pub fn is_decor_context(token: &str) -> bool {
    decoration(token).is_some()
}

pub fn is_logistics(token: &str) -> bool {
    LOGISTICS_LIST.contains_exact(token)
}

/// Splits on anything that is not a letter or digit.
pub fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
}
