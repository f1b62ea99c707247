//! Edit-distance similarity against every corpus row

use async_trait::async_trait;

use crate::models::{MatchResult, Method, TrainingRow};
use crate::normalize::normalize;

use super::{judge, top_n, Matcher, Probe, ScoredRow};

/// Full-scan fuzzy matcher
///
/// Scores are an indel ratio on a 0-100 scale: `2 * lcs / (len_a + len_b)`
/// over characters. The confidence of a match is the score divided by 100.
#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    entries: Vec<(String, TrainingRow)>,
    threshold: f64,
}

impl FuzzyMatcher {
    pub fn new(rows: &[TrainingRow], threshold: f64) -> Self {
        Self {
            entries: build_entries(rows),
            threshold,
        }
    }

    pub fn refresh(&mut self, rows: &[TrainingRow]) {
        self.entries = build_entries(rows);
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    /// Similarity of two strings after normalization, 0-100
    pub fn score(a: &str, b: &str) -> f64 {
        ratio(&normalize(a), &normalize(b))
    }

    /// Highest-scoring row and its 0-100 score; first seen wins ties
    pub fn best(&self, text: &str) -> Option<(&TrainingRow, f64)> {
        let key = normalize(text);
        let mut best: Option<(&TrainingRow, f64)> = None;
        for (candidate, row) in &self.entries {
            let score = ratio(&key, candidate);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((row, score));
            }
        }
        best
    }

    /// Best row if its score reaches `threshold * 100`
    pub fn match_text(&self, text: &str) -> Option<MatchResult> {
        self.evaluate(text).into_match()
    }

    /// The `n` best rows by descending score
    pub fn top_matches(&self, text: &str, n: usize) -> Vec<ScoredRow> {
        let key = normalize(text);
        let scored = self
            .entries
            .iter()
            .map(|(candidate, row)| ScoredRow {
                primary_group: row.primary_group.clone(),
                fs: row.fs,
                score: ratio(&key, candidate),
            })
            .collect();
        top_n(scored, n)
    }

    fn evaluate(&self, text: &str) -> Probe {
        match self.best(text) {
            Some((row, score)) => judge(MatchResult::from_row(row, score / 100.0), self.threshold),
            None => Probe::Empty,
        }
    }
}

/// Indel similarity of two strings, 0-100; two empty strings score 100
fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    200.0 * lcs_len(&a, &b) as f64 / total as f64
}

/// Longest common subsequence length, one row of the table at a time
fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut cur = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            cur[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                prev[j + 1].max(cur[j])
            };
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

fn build_entries(rows: &[TrainingRow]) -> Vec<(String, TrainingRow)> {
    rows.iter()
        .map(|row| (normalize(&row.primary_group), row.clone()))
        .collect()
}

#[async_trait]
impl Matcher for FuzzyMatcher {
    fn method(&self) -> Method {
        Method::Fuzzy
    }

    async fn probe(&self, text: &str) -> Probe {
        self.evaluate(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FsKind;

    fn rows() -> Vec<TrainingRow> {
        vec![
            TrainingRow::new("Sundry Debtors", FsKind::BalanceSheet),
            TrainingRow::new("Sundry Creditors", FsKind::BalanceSheet),
            TrainingRow::new("Salaries and Wages", FsKind::ProfitAndLoss),
        ]
    }

    #[test]
    fn test_typo_matches_above_threshold() {
        let matcher = FuzzyMatcher::new(&rows(), 0.85);
        let result = matcher.match_text("Sundry Debtor").unwrap();
        assert_eq!(result.matched_training_row.as_deref(), Some("Sundry Debtors"));
        assert!(result.confidence >= 0.85 && result.confidence < 1.0);
    }

    #[test]
    fn test_unrelated_text_below_threshold() {
        let matcher = FuzzyMatcher::new(&rows(), 0.85);
        assert!(matcher.match_text("Zorblax Discretionary Fund").is_none());
        assert!(matches!(
            matcher.evaluate("Zorblax Discretionary Fund"),
            Probe::Below(_)
        ));
    }

    #[test]
    fn test_first_seen_wins_ties() {
        let matcher = FuzzyMatcher::new(
            &[
                TrainingRow::new("abcd", FsKind::BalanceSheet),
                TrainingRow::new("abce", FsKind::ProfitAndLoss),
            ],
            0.5,
        );
        let (row, score) = matcher.best("abcf").unwrap();
        assert_eq!(row.primary_group, "abcd");
        assert_eq!(score, 75.0);
    }

    #[test]
    fn test_empty_corpus() {
        let matcher = FuzzyMatcher::new(&[], 0.85);
        assert!(matcher.best("anything").is_none());
        assert_eq!(matcher.evaluate("anything"), Probe::Empty);
        assert!(matcher.top_matches("anything", 5).is_empty());
    }

    #[test]
    fn test_top_matches_sorted() {
        let matcher = FuzzyMatcher::new(&rows(), 0.85);
        let top = matcher.top_matches("Sundry Creditor", 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].primary_group, "Sundry Creditors");
        assert!(top[0].score >= top[1].score);
    }

    #[test]
    fn test_account_suffix_clears_default_threshold() {
        let matcher = FuzzyMatcher::new(&rows(), 0.85);
        let (row, score) = matcher.best("Sundry Debtors A/c").unwrap();
        assert_eq!(row.primary_group, "Sundry Debtors");
        assert_eq!(score, 87.5);
        let result = matcher.match_text("Sundry Debtors A/c").unwrap();
        assert_eq!(result.confidence, 0.875);
    }

    #[test]
    fn test_ratio_counts_insertions_and_deletions() {
        assert_eq!(ratio("", ""), 100.0);
        assert_eq!(ratio("rent", ""), 0.0);
        // one substitution is a deletion plus an insertion
        assert_eq!(ratio("abcd", "abce"), 75.0);
        assert_eq!(ratio("rent paid", "rent"), 200.0 * 4.0 / 13.0);
    }

    #[test]
    fn test_score_is_symmetric_and_normalized() {
        assert_eq!(FuzzyMatcher::score(" RENT", "rent"), 100.0);
        assert_eq!(
            FuzzyMatcher::score("office rent", "rent office"),
            FuzzyMatcher::score("rent office", "office rent")
        );
    }
}
