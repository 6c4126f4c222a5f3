//! Detects which registered manual a question names.
//!
//! Manual ids are tokenized into distinctive words; a question mentions a
//! manual when it contains those words exactly or with a small misspelling.

use std::collections::BTreeSet;

use crate::settings::ScopeSettings;
use crate::types::ManualId;

const STOPWORDS: &[&str] = &[
    "pdf", "manual", "owner", "owners", "guide", "handbook", "user", "users", "edition", "ver", "version", "rev",
];

const EXACT_SCORE: f32 = 1.0;
const FUZZY_SCORE: f32 = 0.9;
const FUZZY_MIN_LEN: usize = 4;

/// Lowercase ASCII alphanumeric runs.
pub fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Distinctive tokens of a manual id: stopwords, four-digit years and tokens
/// shorter than `min_len` are dropped.
pub fn manual_tokens(manual_id: &ManualId, min_len: usize) -> BTreeSet<String> {
    words(manual_id.as_str())
        .into_iter()
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .filter(|w| !(w.len() == 4 && w.chars().all(|c| c.is_ascii_digit())))
        .filter(|w| w.len() >= min_len)
        .collect()
}

/// Ratcliff/Obershelp similarity in `[0, 1]`: twice the matched characters
/// over the total length.
pub fn similarity_ratio(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f32 / total as f32
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (mut best, mut a_at, mut b_at) = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        let mut cur = vec![0usize; b.len() + 1];
        for j in 1..=b.len() {
            if a[i - 1] == b[j - 1] {
                cur[j] = prev[j - 1] + 1;
                if cur[j] > best {
                    best = cur[j];
                    a_at = i - best;
                    b_at = j - best;
                }
            }
        }
        prev = cur;
    }
    if best == 0 {
        return 0;
    }
    best + matching_chars(&a[..a_at], &b[..b_at]) + matching_chars(&a[a_at + best..], &b[b_at + best..])
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mention {
    pub manual_id: ManualId,
    pub score: f32,
    pub matched: String,
}

#[derive(Debug, Clone)]
pub struct ManualSelector {
    fuzzy_threshold: f32,
    min_token_len: usize,
}

impl Default for ManualSelector {
    fn default() -> Self {
        Self::new(&ScopeSettings::default())
    }
}

impl ManualSelector {
    pub fn new(settings: &ScopeSettings) -> Self {
        Self { fuzzy_threshold: settings.fuzzy_threshold, min_token_len: settings.min_token_len }
    }

    /// The manual the question mentions most strongly, if any. On equal
    /// scores the first manual in `manuals` order wins.
    pub fn detect(&self, question: &str, manuals: &[ManualId]) -> Option<Mention> {
        let query: BTreeSet<String> = words(question).into_iter().collect();
        let mut best: Option<Mention> = None;

        for manual_id in manuals {
            let mut score = 0.0;
            let mut matched = None;
            for token in manual_tokens(manual_id, self.min_token_len) {
                if query.contains(&token) {
                    score += EXACT_SCORE;
                    matched = Some(token);
                    continue;
                }
                if token.len() >= FUZZY_MIN_LEN {
                    let close = query
                        .iter()
                        .any(|w| w.len() >= FUZZY_MIN_LEN && similarity_ratio(w, &token) >= self.fuzzy_threshold);
                    if close {
                        score += FUZZY_SCORE;
                        matched = Some(token);
                    }
                }
            }
            let beats = best.as_ref().map_or(score > 0.0, |b| score > b.score);
            if beats {
                if let Some(matched) = matched {
                    best = Some(Mention { manual_id: manual_id.clone(), score, matched });
                }
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<ManualId> {
        names.iter().map(|n| ManualId::from(*n)).collect()
    }

    #[test]
    fn tokens_drop_noise() {
        let toks = manual_tokens(&ManualId::from("Honda_Vezel_Owners_Manual_2016_v2"), 3);
        assert_eq!(toks.into_iter().collect::<Vec<_>>(), vec!["honda".to_string(), "vezel".to_string()]);
    }

    #[test]
    fn ratio_matches_known_values() {
        assert!((similarity_ratio("abcd", "abcd") - 1.0).abs() < f32::EPSILON);
        assert!(similarity_ratio("vezzel", "vezel") >= 0.88);
        assert!(similarity_ratio("lancer", "vezel") < 0.5);
    }

    #[test]
    fn exact_mention_wins_over_fuzzy() {
        let selector = ManualSelector::default();
        let manuals = ids(&["mitsubishi_lancer_2012", "honda_vezel"]);
        let m = selector.detect("How do I reset the lancer clock?", &manuals).expect("mention");
        assert_eq!(m.manual_id.as_str(), "mitsubishi_lancer_2012");
        assert_eq!(m.matched, "lancer");

        let fuzzy = selector.detect("vezzel tyre pressure", &manuals).expect("fuzzy mention");
        assert_eq!(fuzzy.manual_id.as_str(), "honda_vezel");
        assert!((fuzzy.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn no_mention_for_generic_question() {
        let selector = ManualSelector::default();
        assert!(selector.detect("what is the oil capacity", &ids(&["honda_vezel"])).is_none());
    }
}
