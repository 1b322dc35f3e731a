//! Heuristic text signals used by the quality gate.
//!
//! All scores are in 0.0..=1.0. Spam and promotional scores are "higher is
//! worse"; readability and authenticity are "higher is better".

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static PROMOTIONAL_RE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\bcheck out\b",
        r"\bvisit\s+(our|my)\b",
        r"\bclick\s+(here|the\s+link)\b",
        r"\buse\s+(my|our|this)\s+code\b",
        r"\bdiscount\s+code\b",
        r"\bpromo\s+code\b",
        r"\baffiliate\b",
        r"\bsponsored\b",
        r"\b(buy|purchase)\s+now\b",
        r"\bfree\s+trial\b",
        r"\bsign\s+up\b",
        r"\bsubscribe\b.*\bchannel\b",
        r"\bfollow\s+(me|us)\b",
        r"\blink\s+in\s+(bio|description)\b",
    ]
    .iter()
    .map(|pattern| Regex::new(&format!("(?i){pattern}")).unwrap())
    .collect()
});

static SPAM_RE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)(?:https?://)?(?:www\.)?[a-z0-9-]+\.[a-z]{2,}(?:/\S*)?",
        r"\$\d+",
        r"(?i)\d+%\s*off",
        r"!!!+",
        // Shouted sales words only; lowercase "buy" is ordinary speech.
        r"FREE\s*[A-Z]+",
        r"\b(?:BUY|SALE|DISCOUNT|OFFER|LIMITED)\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).unwrap())
    .collect()
});

static SENTENCE_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+").unwrap());

static PERSONAL_PRONOUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(i|my|me|we|our)\b").unwrap());

const REPEATED_RUN: usize = 5;
const MIN_NATURAL_CHARS: usize = 50;
const MAX_NATURAL_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSignals {
    pub spam_score: f64,
    pub spam_indicators: Vec<String>,
    pub promotional_score: f64,
    pub promotional_matches: Vec<String>,
    pub word_count: usize,
    pub char_count: usize,
    pub avg_sentence_length: f64,
    pub readability: f64,
    pub authenticity_score: f64,
}

fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn is_shouted(word: &str) -> bool {
    word.chars().count() > 2
        && word.chars().any(char::is_alphabetic)
        && word
            .chars()
            .filter(|c| c.is_alphabetic())
            .all(char::is_uppercase)
}

fn has_repeated_run(text: &str) -> bool {
    let mut previous = None;
    let mut run = 0;
    for c in text.chars() {
        if Some(c) == previous {
            run += 1;
            if run >= REPEATED_RUN {
                return true;
            }
        } else {
            previous = Some(c);
            run = 1;
        }
    }
    false
}

pub fn promotional_language(text: &str) -> (f64, Vec<String>) {
    let matches: Vec<String> = PROMOTIONAL_RE
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.as_str().to_lowercase()))
        .collect();
    let density = matches.len() as f64 / word_count(text).max(1) as f64;
    ((density * 10.0).min(1.0), matches)
}

pub fn spam_patterns(text: &str) -> (f64, Vec<String>) {
    let indicators: Vec<String> = SPAM_RE
        .iter()
        .flat_map(|re| re.find_iter(text).map(|m| m.as_str().to_string()))
        .collect();

    let words: Vec<&str> = text.split_whitespace().collect();
    let shouted = words.iter().filter(|w| is_shouted(w)).count();
    let caps_ratio = shouted as f64 / words.len().max(1) as f64;
    let repeated = if has_repeated_run(text) { 0.3 } else { 0.0 };

    let score = indicators.len() as f64 * 0.2 + caps_ratio * 0.5 + repeated;
    (score.min(1.0), indicators)
}

/// Returns `(readability, average words per sentence)`. Ten to twenty words
/// per sentence reads best.
pub fn readability(text: &str) -> (f64, f64) {
    let sentences = SENTENCE_SPLIT_RE
        .split(text)
        .filter(|s| !s.trim().is_empty())
        .count();
    let words = word_count(text);
    if words == 0 || sentences == 0 {
        return (0.0, 0.0);
    }

    let avg = words as f64 / sentences as f64;
    let score = if avg < 10.0 {
        0.8
    } else if avg <= 20.0 {
        1.0
    } else if avg <= 30.0 {
        0.7
    } else {
        0.5
    };
    (score, avg)
}

pub fn authenticity(text: &str) -> f64 {
    let (promo, _) = promotional_language(text);
    let (spam, _) = spam_patterns(text);
    let (readable, _) = readability(text);

    let mut score = 1.0 - promo * 0.3 - spam * 0.4;
    score *= readable;

    let chars = text.chars().count();
    if chars < MIN_NATURAL_CHARS {
        score -= 0.2;
    }
    if chars > MAX_NATURAL_CHARS {
        score -= 0.1;
    }

    if text.contains('?') {
        score += 0.05;
    }
    let pronouns = PERSONAL_PRONOUN_RE.find_iter(text).count();
    score += (pronouns as f64 * 0.02).min(0.1);

    score.clamp(0.0, 1.0)
}

pub fn analyze(text: &str) -> TextSignals {
    let (spam_score, spam_indicators) = spam_patterns(text);
    let (promotional_score, promotional_matches) = promotional_language(text);
    let (readability, avg_sentence_length) = readability(text);
    TextSignals {
        spam_score,
        spam_indicators,
        promotional_score,
        promotional_matches,
        word_count: word_count(text),
        char_count: text.chars().count(),
        avg_sentence_length,
        readability,
        authenticity_score: authenticity(text),
    }
}
