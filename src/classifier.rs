//! Turning a vision model's free-text answer into a risk verdict.
//!
//! Two policies live here and are intentionally kept apart:
//!
//! * [`classify`] is the strict YES/NO gate used by the inference engine.
//! * [`ConfidenceHeuristic`] scores answers that carry a `confidence:` marker
//!   and is only used to annotate raw client responses.

/// Word characters for boundary purposes: alphanumerics and underscore
fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// True when `text` opens with `word` and the word ends there
fn starts_with_word(text: &str, word: &str) -> bool {
    match text.strip_prefix(word) {
        Some(rest) => rest.chars().next().map_or(true, |c| !is_word_char(c)),
        None => false,
    }
}

/// True when `word` appears delimited by word boundaries on both sides
fn contains_word(text: &str, word: &str) -> bool {
    text.match_indices(word).any(|(start, matched)| {
        let before = text[..start].chars().next_back();
        let after = text[start + matched.len()..].chars().next();
        before.map_or(true, |c| !is_word_char(c)) && after.map_or(true, |c| !is_word_char(c))
    })
}

/// Strict verdict over a model answer.
///
/// A leading `yes` wins, then a leading `no`; failing both, the answer is
/// risky only if the standalone word `yes` appears somewhere in it.
pub fn classify(response_text: &str) -> bool {
    let text = response_text.trim().to_lowercase();

    if starts_with_word(&text, "yes") {
        true
    } else if starts_with_word(&text, "no") {
        false
    } else {
        contains_word(&text, "yes")
    }
}

/// Confidence and risk derived from keyword scanning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub confidence: f32,
    pub risk: bool,
}

/// Keyword/confidence scoring for unstructured answers
pub struct ConfidenceHeuristic;

impl ConfidenceHeuristic {
    const MARKER: &'static str = "confidence:";
    const NEUTRAL: f32 = 0.5;
    const KEYWORDS: [&'static str; 4] = ["unsafe", "danger", "risk", "fall"];
    const KEYWORD_THRESHOLD: f32 = 0.4;
    const PLAIN_THRESHOLD: f32 = 0.8;

    /// Number following `confidence:`, clamped to [0, 1]; 0.5 when missing
    pub fn extract_confidence(text: &str) -> f32 {
        let lowered = text.to_lowercase();
        let Some((_, after)) = lowered.split_once(Self::MARKER) else {
            return Self::NEUTRAL;
        };

        match after.split_whitespace().next().map(str::parse::<f32>) {
            Some(Ok(value)) if !value.is_nan() => value.clamp(0.0, 1.0),
            _ => Self::NEUTRAL,
        }
    }

    /// Risk keywords lower the bar the confidence has to clear
    pub fn detect_risk(text: &str, confidence: f32) -> bool {
        let lowered = text.to_lowercase();
        if Self::KEYWORDS.iter().any(|word| lowered.contains(word)) {
            confidence >= Self::KEYWORD_THRESHOLD
        } else {
            confidence >= Self::PLAIN_THRESHOLD
        }
    }

    pub fn assess(text: &str) -> Assessment {
        let confidence = Self::extract_confidence(text);
        Assessment {
            confidence,
            risk: Self::detect_risk(text, confidence),
        }
    }
}
