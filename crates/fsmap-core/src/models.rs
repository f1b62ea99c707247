//! Domain models for fsmap

use serde::{Deserialize, Serialize};

/// Columns every corpus source must provide
pub const REQUIRED_COLUMNS: [&str; 2] = ["primary_group", "fs"];

/// The ten optional classification columns, in table order
pub const CLASSIFICATION_COLUMNS: [&str; 10] = [
    "bs_main_category",
    "bs_classification",
    "bs_sub_classification",
    "bs_sub_classification_2",
    "pl_classification",
    "pl_sub_classification",
    "pl_classification_1",
    "cf_classification",
    "cf_sub_classification",
    "expense_type",
];

/// Balance-sheet side every Profit & Loss line is posted against
pub const EQUITY_PLACEHOLDER: [&str; 4] = [
    "Equity And Liabilities",
    "Capital A/c",
    "Reserve and Surplus",
    "1. Capital",
];

/// Financial statement a line item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FsKind {
    #[serde(rename = "Balance Sheet")]
    BalanceSheet,
    #[serde(rename = "Profit & Loss")]
    ProfitAndLoss,
}

impl FsKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BalanceSheet => "Balance Sheet",
            Self::ProfitAndLoss => "Profit & Loss",
        }
    }

    pub fn all() -> &'static [FsKind] {
        &[Self::BalanceSheet, Self::ProfitAndLoss]
    }
}

/// Only the two exact labels are accepted (after trimming).
impl std::str::FromStr for FsKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "Balance Sheet" => Ok(Self::BalanceSheet),
            "Profit & Loss" => Ok(Self::ProfitAndLoss),
            other => Err(format!(
                "Invalid fs value: '{}'. Must be 'Balance Sheet' or 'Profit & Loss'",
                other
            )),
        }
    }
}

impl std::fmt::Display for FsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The ten optional sub-classification columns
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationColumns {
    pub bs_main_category: Option<String>,
    pub bs_classification: Option<String>,
    pub bs_sub_classification: Option<String>,
    pub bs_sub_classification_2: Option<String>,
    pub pl_classification: Option<String>,
    pub pl_sub_classification: Option<String>,
    pub pl_classification_1: Option<String>,
    pub cf_classification: Option<String>,
    pub cf_sub_classification: Option<String>,
    pub expense_type: Option<String>,
}

impl ClassificationColumns {
    /// Look up a column by its table name
    pub fn get(&self, column: &str) -> Option<&str> {
        let value = match column {
            "bs_main_category" => &self.bs_main_category,
            "bs_classification" => &self.bs_classification,
            "bs_sub_classification" => &self.bs_sub_classification,
            "bs_sub_classification_2" => &self.bs_sub_classification_2,
            "pl_classification" => &self.pl_classification,
            "pl_sub_classification" => &self.pl_sub_classification,
            "pl_classification_1" => &self.pl_classification_1,
            "cf_classification" => &self.cf_classification,
            "cf_sub_classification" => &self.cf_sub_classification,
            "expense_type" => &self.expense_type,
            _ => return None,
        };
        value.as_deref()
    }

    /// Set a column by its table name. Returns false for unknown columns.
    pub fn set(&mut self, column: &str, value: Option<String>) -> bool {
        let slot = match column {
            "bs_main_category" => &mut self.bs_main_category,
            "bs_classification" => &mut self.bs_classification,
            "bs_sub_classification" => &mut self.bs_sub_classification,
            "bs_sub_classification_2" => &mut self.bs_sub_classification_2,
            "pl_classification" => &mut self.pl_classification,
            "pl_sub_classification" => &mut self.pl_sub_classification,
            "pl_classification_1" => &mut self.pl_classification_1,
            "cf_classification" => &mut self.cf_classification,
            "cf_sub_classification" => &mut self.cf_sub_classification,
            "expense_type" => &mut self.expense_type,
            _ => return false,
        };
        *slot = value;
        true
    }

    /// Apply the statement hierarchy rule for `fs`.
    ///
    /// Profit & Loss lines get the equity placeholder on the `bs_*` side;
    /// Balance Sheet lines have no `pl_*` columns and no expense type.
    pub fn enforce_statement_rules(&mut self, fs: FsKind) {
        match fs {
            FsKind::ProfitAndLoss => {
                let [main, class, sub, sub2] = EQUITY_PLACEHOLDER.map(|s| Some(s.to_string()));
                self.bs_main_category = main;
                self.bs_classification = class;
                self.bs_sub_classification = sub;
                self.bs_sub_classification_2 = sub2;
            }
            FsKind::BalanceSheet => {
                self.pl_classification = None;
                self.pl_sub_classification = None;
                self.pl_classification_1 = None;
                self.expense_type = None;
            }
        }
    }
}

/// One labeled training example
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub primary_group: String,
    pub fs: FsKind,
    #[serde(flatten)]
    pub columns: ClassificationColumns,
}

impl TrainingRow {
    /// A row with only the two required columns set
    pub fn new(primary_group: impl Into<String>, fs: FsKind) -> Self {
        Self {
            primary_group: primary_group.into(),
            fs,
            columns: ClassificationColumns::default(),
        }
    }

    pub fn with_columns(mut self, columns: ClassificationColumns) -> Self {
        self.columns = columns;
        self
    }
}

/// `fs` plus the ten sub-classification columns of a prediction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictedColumns {
    pub fs: FsKind,
    #[serde(flatten)]
    pub columns: ClassificationColumns,
}

/// Cascade stage / classification method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Exact,
    Fuzzy,
    Semantic,
    Embeddings,
    Llm,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::Semantic => "semantic",
            Self::Embeddings => "embeddings",
            Self::Llm => "llm",
        }
    }

    /// Cascade order
    pub fn all() -> &'static [Method] {
        &[
            Self::Exact,
            Self::Fuzzy,
            Self::Semantic,
            Self::Embeddings,
            Self::Llm,
        ]
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "fuzzy" => Ok(Self::Fuzzy),
            "semantic" => Ok(Self::Semantic),
            "embeddings" | "embedding" => Ok(Self::Embeddings),
            "llm" => Ok(Self::Llm),
            _ => Err(format!("Unknown method: {}", s)),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Uniform output of every matcher
///
/// `predicted_columns.fs` always equals `predicted_fs`; build values through
/// [`MatchResult::from_row`] or [`MatchResult::generated`] to keep it that way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub predicted_fs: FsKind,
    /// In [0, 1]
    pub confidence: f64,
    pub matched_row: Option<TrainingRow>,
    /// Display name of the matched example, or a sentinel for generated predictions
    pub matched_training_row: Option<String>,
    pub predicted_columns: PredictedColumns,
    /// Only set by the generative matcher
    pub reasoning: Option<String>,
}

impl MatchResult {
    /// Result that copies a training row
    pub fn from_row(row: &TrainingRow, confidence: f64) -> Self {
        Self {
            predicted_fs: row.fs,
            confidence: confidence.clamp(0.0, 1.0),
            matched_row: Some(row.clone()),
            matched_training_row: Some(row.primary_group.clone()),
            predicted_columns: PredictedColumns {
                fs: row.fs,
                columns: row.columns.clone(),
            },
            reasoning: None,
        }
    }

    /// Result produced without a training row (generative stage)
    pub fn generated(
        fs: FsKind,
        confidence: f64,
        columns: ClassificationColumns,
        matched_training_row: &str,
        reasoning: Option<String>,
    ) -> Self {
        Self {
            predicted_fs: fs,
            confidence: confidence.clamp(0.0, 1.0),
            matched_row: None,
            matched_training_row: Some(matched_training_row.to_string()),
            predicted_columns: PredictedColumns { fs, columns },
            reasoning,
        }
    }
}

/// What happened at one cascade stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum StageOutcome {
    /// Cleared the stage threshold; cascade stopped here
    Matched,
    /// Best candidate did not clear the threshold
    BelowThreshold,
    /// The matcher had nothing to offer (empty corpus, no key hit)
    NoCandidate,
    /// The matcher could not run (e.g. embedding service unreachable)
    Degraded(String),
}

/// One entry of a decision trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionStep {
    pub method: Method,
    pub outcome: StageOutcome,
    pub result: Option<MatchResult>,
}

/// Final output of the cascade for one input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub primary_group: String,
    pub predicted_fs: FsKind,
    pub confidence: f64,
    pub method_used: Method,
    pub matched_training_row: Option<String>,
    pub needs_review: bool,
    /// Opposite statement, only when `needs_review`
    pub low_confidence_alternative: Option<FsKind>,
    pub reasoning: Option<String>,
    pub columns: PredictedColumns,
    /// Snapshot of the training row that produced the match
    pub matched_row_full: Option<TrainingRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_trail: Option<Vec<DecisionStep>>,
}

/// A not-yet-classified staging item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingItem {
    pub stg_id: i64,
    pub tenant_id: Option<String>,
    pub raw_id: Option<String>,
    pub primary_group: String,
}

/// Count of classifications per method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDistribution {
    pub exact: u64,
    pub fuzzy: u64,
    pub semantic: u64,
    pub embeddings: u64,
    pub llm: u64,
}

impl MethodDistribution {
    pub fn record(&mut self, method: Method) {
        *self.slot(method) += 1;
    }

    pub fn get(&self, method: Method) -> u64 {
        match method {
            Method::Exact => self.exact,
            Method::Fuzzy => self.fuzzy,
            Method::Semantic => self.semantic,
            Method::Embeddings => self.embeddings,
            Method::Llm => self.llm,
        }
    }

    pub fn total(&self) -> u64 {
        Method::all().iter().map(|m| self.get(*m)).sum()
    }

    fn slot(&mut self, method: Method) -> &mut u64 {
        match method {
            Method::Exact => &mut self.exact,
            Method::Fuzzy => &mut self.fuzzy,
            Method::Semantic => &mut self.semantic,
            Method::Embeddings => &mut self.embeddings,
            Method::Llm => &mut self.llm,
        }
    }
}

/// Counters kept by the generative matcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmStats {
    /// Calls that produced a valid answer
    pub call_count: u64,
    /// Every request sent, including retries
    pub attempt_count: u64,
    /// Calls that exhausted retries and fell back
    pub fallback_count: u64,
}

/// Running statistics for one mapper session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub predictions_made: u64,
    pub method_distribution: MethodDistribution,
    pub needs_review_count: u64,
    pub llm_call_count: u64,
    pub llm_stats: LlmStats,
}

/// Aggregate statistics over a set of records
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub total_processed: u64,
    pub method_distribution: MethodDistribution,
    pub needs_review_count: u64,
    pub needs_review_percentage: f64,
    pub average_confidence: f64,
    pub llm_calls: u64,
}

impl BatchStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ClassificationRecord>) -> Self {
        let mut stats = Self::default();
        let mut confidence_sum = 0.0;
        for record in records {
            stats.total_processed += 1;
            stats.method_distribution.record(record.method_used);
            if record.needs_review {
                stats.needs_review_count += 1;
            }
            confidence_sum += record.confidence;
        }
        if stats.total_processed > 0 {
            let total = stats.total_processed as f64;
            stats.needs_review_percentage = stats.needs_review_count as f64 / total * 100.0;
            stats.average_confidence = confidence_sum / total;
        }
        stats.llm_calls = stats.method_distribution.llm;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_kind_parse() {
        assert_eq!(
            "Balance Sheet".parse::<FsKind>().unwrap(),
            FsKind::BalanceSheet
        );
        assert_eq!(
            " Profit & Loss ".parse::<FsKind>().unwrap(),
            FsKind::ProfitAndLoss
        );
        assert!("balance sheet".parse::<FsKind>().is_err());
        assert!("P&L".parse::<FsKind>().is_err());
    }

    #[test]
    fn test_fs_kind_serde_labels() {
        let json = serde_json::to_string(&FsKind::ProfitAndLoss).unwrap();
        assert_eq!(json, "\"Profit & Loss\"");
        let back: FsKind = serde_json::from_str("\"Balance Sheet\"").unwrap();
        assert_eq!(back, FsKind::BalanceSheet);
    }

    #[test]
    fn test_columns_get_set() {
        let mut columns = ClassificationColumns::default();
        assert!(columns.set("cf_classification", Some("I. Cash Flow".into())));
        assert_eq!(columns.get("cf_classification"), Some("I. Cash Flow"));
        assert!(!columns.set("unknown", None));
        assert_eq!(columns.get("unknown"), None);
    }

    #[test]
    fn test_enforce_profit_and_loss() {
        let mut columns = ClassificationColumns {
            bs_main_category: Some("Assets".into()),
            pl_classification: Some("Indirect Expenses".into()),
            ..Default::default()
        };
        columns.enforce_statement_rules(FsKind::ProfitAndLoss);
        assert_eq!(columns.bs_main_category.as_deref(), Some("Equity And Liabilities"));
        assert_eq!(columns.bs_classification.as_deref(), Some("Capital A/c"));
        assert_eq!(columns.bs_sub_classification.as_deref(), Some("Reserve and Surplus"));
        assert_eq!(columns.bs_sub_classification_2.as_deref(), Some("1. Capital"));
        assert_eq!(columns.pl_classification.as_deref(), Some("Indirect Expenses"));
    }

    #[test]
    fn test_enforce_balance_sheet() {
        let mut columns = ClassificationColumns {
            bs_main_category: Some("Assets".into()),
            pl_classification: Some("Indirect Expenses".into()),
            pl_sub_classification: Some("Other expenses".into()),
            pl_classification_1: Some("D. Indirect Expenses".into()),
            expense_type: Some("Operating Expense".into()),
            cf_classification: Some("I. Cash Flow from Operating Activities".into()),
            ..Default::default()
        };
        columns.enforce_statement_rules(FsKind::BalanceSheet);
        assert_eq!(columns.bs_main_category.as_deref(), Some("Assets"));
        assert!(columns.pl_classification.is_none());
        assert!(columns.pl_sub_classification.is_none());
        assert!(columns.pl_classification_1.is_none());
        assert!(columns.expense_type.is_none());
        assert!(columns.cf_classification.is_some());
    }

    #[test]
    fn test_match_result_from_row_keeps_fs_consistent() {
        let row = TrainingRow::new("Cash at Bank", FsKind::BalanceSheet);
        let result = MatchResult::from_row(&row, 1.2);
        assert_eq!(result.predicted_fs, result.predicted_columns.fs);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.matched_training_row.as_deref(), Some("Cash at Bank"));
    }

    #[test]
    fn test_training_row_flattened_json() {
        let row = TrainingRow::new("Rent", FsKind::ProfitAndLoss).with_columns(
            ClassificationColumns {
                expense_type: Some("Operating Expense".into()),
                ..Default::default()
            },
        );
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["primary_group"], "Rent");
        assert_eq!(value["fs"], "Profit & Loss");
        assert_eq!(value["expense_type"], "Operating Expense");
        assert!(value["pl_classification"].is_null());
    }

    #[test]
    fn test_method_distribution() {
        let mut dist = MethodDistribution::default();
        dist.record(Method::Exact);
        dist.record(Method::Exact);
        dist.record(Method::Llm);
        assert_eq!(dist.get(Method::Exact), 2);
        assert_eq!(dist.get(Method::Llm), 1);
        assert_eq!(dist.total(), 3);
    }

    #[test]
    fn test_batch_stats_empty() {
        let records: Vec<ClassificationRecord> = Vec::new();
        let stats = BatchStats::from_records(&records);
        assert_eq!(stats.total_processed, 0);
        assert_eq!(stats.average_confidence, 0.0);
        assert_eq!(stats.needs_review_percentage, 0.0);
    }
}
