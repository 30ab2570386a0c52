//! Noise classification for transcripts
//!
//! Speech models hallucinate on silence and background noise: short
//! interjections, stock sign-off phrases, subtitle attribution credits. This
//! filter drops those before they reach the chat pipeline. It is a heuristic,
//! not a guarantee; occasional false positives and negatives are acceptable.

use once_cell::sync::Lazy;
use regex::Regex;

/// Transcripts whose trimmed text equals one of these (case-insensitively for
/// Latin script) are treated as hallucinated filler.
const FILLER_PHRASES: &[&str] = &[
    // Short interjections
    "はい。",
    "はい",
    "うん。",
    "うん",
    "you",
    "bye.",
    "bye-bye.",
    "thank you.",
    // Stock sign-off phrases
    "ありがとうございました。",
    "ご視聴ありがとうございました",
    "ご視聴ありがとうございました。",
    "おやすみなさい。",
    "thank you for watching.",
    "thank you for watching",
    "thanks for watching.",
    "thanks for watching!",
    // Attribution / annotation tags
    "subtitles by the amara.org community",
    "[blank_audio]",
    "[music]",
    "[applause]",
];

/// Punctuation, symbols and whitespace: everything that does not count
/// toward the 3-character speech floor.
static NON_CONTENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{P}\p{S}\p{Z}\p{C}\s]+").expect("valid noise pattern"));

/// Classify a transcript as hallucinated/filler noise.
///
/// A transcript is noise when fewer than 3 characters remain after stripping
/// punctuation and whitespace, or when the full trimmed text matches a known
/// filler phrase.
pub fn is_noise_transcript(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }

    let lowered = trimmed.to_lowercase();
    if FILLER_PHRASES.iter().any(|phrase| lowered == *phrase) {
        return true;
    }

    let stripped = NON_CONTENT.replace_all(trimmed, "");
    stripped.chars().count() < 3
}

/// Mean per-segment no-speech probability, 0.0 when there are no segments.
pub fn mean_no_speech(probabilities: &[f32]) -> f32 {
    if probabilities.is_empty() {
        return 0.0;
    }
    probabilities.iter().sum::<f32>() / probabilities.len() as f32
}
