//! Text canonicalization shared by every matcher and by corpus duplicate checks

use crate::models::FsKind;

/// Canonical comparison key: trimmed and lowercased.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Like [`normalize`], but maps a missing value to the empty string.
pub fn normalize_opt(text: Option<&str>) -> String {
    text.map(normalize).unwrap_or_default()
}

/// The other financial statement
pub fn opposite_fs(fs: FsKind) -> FsKind {
    match fs {
        FsKind::BalanceSheet => FsKind::ProfitAndLoss,
        FsKind::ProfitAndLoss => FsKind::BalanceSheet,
    }
}

/// Truncate to `max` characters, adding "..." if truncated
pub fn truncate_text(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims_and_lowercases() {
        assert_eq!(normalize("  Cash AT Bank "), "cash at bank");
        assert_eq!(normalize("\tGST Payable\n"), "gst payable");
    }

    #[test]
    fn test_normalize_keeps_inner_spacing() {
        assert_eq!(normalize("Sundry  Debtors"), "sundry  debtors");
    }

    #[test]
    fn test_normalize_missing_is_empty() {
        assert_eq!(normalize_opt(None), "");
        assert_eq!(normalize_opt(Some("  ")), "");
        assert_eq!(normalize_opt(Some("Rent")), "rent");
    }

    #[test]
    fn test_opposite_fs() {
        assert_eq!(opposite_fs(FsKind::BalanceSheet), FsKind::ProfitAndLoss);
        assert_eq!(opposite_fs(FsKind::ProfitAndLoss), FsKind::BalanceSheet);
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 10), "short");
        assert_eq!(truncate_text("Professional Tax Payable", 10), "Profess...");
        // multi-byte characters are never split
        assert_eq!(truncate_text("₹₹₹₹₹₹₹₹", 5), "₹₹...");
    }
}
