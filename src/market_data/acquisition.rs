use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which source a fetch plan selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStrategy {
    BulkFull,
    ApiIncremental,
}

impl FetchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStrategy::BulkFull => "bulk_full",
            FetchStrategy::ApiIncremental => "api_incremental",
        }
    }
}

/// Per-symbol fetch plan produced by the hybrid acquisition policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPlan {
    pub strategy: FetchStrategy,
    pub from: NaiveDate,
    pub to: NaiveDate,
}

/// Hybrid source selection.
///
/// No stored data, or a gap wider than `threshold_days`, means a full bulk
/// load from `history_start`; otherwise the API patches the window
/// `(last_stored, today]`.
pub fn plan_price_fetch(
    last_stored: Option<NaiveDate>,
    today: NaiveDate,
    history_start: NaiveDate,
    threshold_days: i64,
) -> FetchPlan {
    match last_stored {
        None => FetchPlan {
            strategy: FetchStrategy::BulkFull,
            from: history_start,
            to: today,
        },
        Some(last) => {
            let gap_days = (today - last).num_days();
            if gap_days <= threshold_days {
                FetchPlan {
                    strategy: FetchStrategy::ApiIncremental,
                    from: last.succ_opt().unwrap_or(last),
                    to: today,
                }
            } else {
                FetchPlan {
                    strategy: FetchStrategy::BulkFull,
                    from: history_start,
                    to: today,
                }
            }
        }
    }
}

/// Fundamentals refresh decision: refresh when nothing is stored or the
/// latest reporting period is older than `refresh_days`.
pub fn fundamentals_due(
    latest_period_end: Option<NaiveDate>,
    today: NaiveDate,
    refresh_days: i64,
) -> bool {
    match latest_period_end {
        None => true,
        Some(period_end) => (today - period_end).num_days() > refresh_days,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn first_load_goes_bulk_from_history_start() {
        let plan = plan_price_fetch(None, date("2024-06-01"), date("2000-01-01"), 100);
        assert_eq!(plan.strategy, FetchStrategy::BulkFull);
        assert_eq!(plan.from, date("2000-01-01"));
        assert_eq!(plan.to, date("2024-06-01"));
    }

    #[test]
    fn recent_gap_goes_incremental_from_next_day() {
        let plan = plan_price_fetch(
            Some(date("2024-05-22")),
            date("2024-06-01"),
            date("2000-01-01"),
            100,
        );
        assert_eq!(plan.strategy, FetchStrategy::ApiIncremental);
        assert_eq!(plan.from, date("2024-05-23"));
        assert_eq!(plan.to, date("2024-06-01"));
    }

    #[test]
    fn gap_at_threshold_still_incremental() {
        let plan = plan_price_fetch(
            Some(date("2024-02-22")),
            date("2024-06-01"),
            date("2000-01-01"),
            100,
        );
        assert_eq!((date("2024-06-01") - date("2024-02-22")).num_days(), 100);
        assert_eq!(plan.strategy, FetchStrategy::ApiIncremental);
    }

    #[test]
    fn stale_gap_escalates_to_bulk() {
        let plan = plan_price_fetch(
            Some(date("2023-11-14")),
            date("2024-06-01"),
            date("2000-01-01"),
            100,
        );
        assert_eq!(plan.strategy, FetchStrategy::BulkFull);
        assert_eq!(plan.from, date("2000-01-01"));
    }

    #[test]
    fn fundamentals_refresh_when_absent_or_old() {
        assert!(fundamentals_due(None, date("2024-06-01"), 90));
        assert!(fundamentals_due(
            Some(date("2024-01-01")),
            date("2024-06-01"),
            90
        ));
        assert!(!fundamentals_due(
            Some(date("2024-03-31")),
            date("2024-06-01"),
            90
        ));
    }
}
