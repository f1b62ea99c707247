//! Normalized-key lookup

use std::collections::HashMap;

use async_trait::async_trait;

use crate::models::{MatchResult, Method, TrainingRow};
use crate::normalize::normalize;

use super::{Matcher, Probe};

/// O(1) lookup from normalized `primary_group` to its training row
#[derive(Debug, Clone, Default)]
pub struct ExactMatcher {
    index: HashMap<String, TrainingRow>,
}

impl ExactMatcher {
    pub fn new(rows: &[TrainingRow]) -> Self {
        Self {
            index: build_index(rows),
        }
    }

    /// Swap in an index built from `rows`
    pub fn refresh(&mut self, rows: &[TrainingRow]) {
        self.index = build_index(rows);
    }

    pub fn lookup(&self, text: &str) -> Option<&TrainingRow> {
        self.index.get(&normalize(text))
    }

    /// Confidence 1.0 on a key hit, nothing otherwise
    pub fn match_text(&self, text: &str) -> Option<MatchResult> {
        self.lookup(text).map(|row| MatchResult::from_row(row, 1.0))
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

// Later rows overwrite earlier ones that normalize identically
fn build_index(rows: &[TrainingRow]) -> HashMap<String, TrainingRow> {
    rows.iter()
        .map(|row| (normalize(&row.primary_group), row.clone()))
        .collect()
}

#[async_trait]
impl Matcher for ExactMatcher {
    fn method(&self) -> Method {
        Method::Exact
    }

    async fn probe(&self, text: &str) -> Probe {
        match self.match_text(text) {
            Some(result) => Probe::Match(result),
            None => Probe::Empty,
        }
    }
}
