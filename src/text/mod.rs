//! Deterministic text handling: normalisation, vocabularies, price detection and the rule baseline.

pub mod lexicon;
pub mod normalize;
pub mod price;
pub mod rules;

pub use normalize::{NormalizedText, normalize};
pub use rules::extract_baseline;
