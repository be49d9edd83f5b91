//! Core domain model for tillsync: sales records, date ranges and the pure
//! range-validation / month-chunking / estimation logic the sync pipeline is
//! built on.

use chrono::{Datelike, FixedOffset, Months, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "tillsync-core";

/// Today's date in the business timezone, expressed as a fixed UTC offset.
/// The vendor's reporting day rolls over on local midnight, not UTC.
pub fn business_today(utc_offset_hours: i32) -> NaiveDate {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap());
    Utc::now().with_timezone(&offset).date_naive()
}

/// Minutes of wall-clock work budgeted per monthly chunk (vendor UI fetch +
/// staging load).
pub const PER_CHUNK_MINUTES: u32 = 2;

/// One line-item transaction row as exported by the vendor POS. Fields are
/// kept as raw export strings; typing happens when staging rows are promoted
/// into the final table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SalesRecord {
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub receipt_number: String,
    #[serde(default)]
    pub invoice_number: String,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub payment_details: String,
    #[serde(default)]
    pub customer_name: String,
    #[serde(default)]
    pub customer_phone_number: String,
    #[serde(default)]
    pub product_name: String,
    #[serde(default)]
    pub tab: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub unit_price: String,
    #[serde(default)]
    pub total_price: String,
    #[serde(default)]
    pub gross_amount: String,
    #[serde(default)]
    pub discount_amount: String,
    #[serde(default)]
    pub net_sales_amount: String,
    #[serde(default)]
    pub tax_amount: String,
    #[serde(default)]
    pub total_amount: String,
    #[serde(default)]
    pub store_id: String,
    #[serde(default)]
    pub update_time: String,
}

impl SalesRecord {
    /// Business date of the transaction, or `None` when the export carried an
    /// empty or unparseable date. Records without a parseable date are
    /// excluded from span derivation and from insertion.
    pub fn business_date(&self) -> Option<NaiveDate> {
        parse_record_date(&self.date)
    }
}

/// Parse a vendor export timestamp. Exports have shipped both ISO
/// (`YYYY-MM-DD HH:MM:SS`) and day-first (`DD/MM/YYYY HH:MM:SS`) stamps, and
/// occasionally a bare date (taken as midnight).
pub fn parse_record_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%d/%m/%Y %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn parse_record_date(raw: &str) -> Option<NaiveDate> {
    parse_record_timestamp(raw).map(|dt| dt.date())
}

/// Inclusive date range. Validator output always satisfies `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// A [`DateRange`] fully contained within one calendar month, except possibly
/// truncated at the overall range's boundaries.
pub type MonthlyChunk = DateRange;

/// Clamp policy for caller-supplied historical ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePolicy {
    /// No data exists before this date; starts are clamped up to it.
    pub earliest_allowed: NaiveDate,
    /// Maximum calendar-month span of one historical run.
    pub max_months: u32,
}

impl Default for RangePolicy {
    fn default() -> Self {
        Self {
            // The POS went live March 2024.
            earliest_allowed: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            max_months: 12,
        }
    }
}

/// A validated range plus the human-readable adjustments that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedRange {
    pub range: DateRange,
    pub warnings: Vec<String>,
}

/// Clamp and normalize a caller-supplied `(start, end)` pair into a safe,
/// historically valid range. Never fails; every adjustment appends one
/// warning. Rules apply in order: future start, future end, span cap,
/// earliest-allowed floor, swap. Swapping can re-expose a start before the
/// floor or an over-long span, so those two clamps run again afterwards.
pub fn validate_date_range(
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
    policy: &RangePolicy,
) -> ValidatedRange {
    let mut start = start;
    let mut end = end;
    let mut warnings = Vec::new();

    if start > today {
        start = today;
        warnings.push("start date adjusted to today (cannot sync future dates)".to_string());
    }
    if end > today {
        end = today;
        warnings.push("end date adjusted to today (cannot sync future dates)".to_string());
    }

    if months_between(start, end) > policy.max_months as i32 {
        end = add_months(start, policy.max_months);
        warnings.push(format!(
            "date range limited to {} months to prevent timeout",
            policy.max_months
        ));
    }

    if start < policy.earliest_allowed {
        start = policy.earliest_allowed;
        warnings.push(format!(
            "start date adjusted to {} (earliest available data)",
            policy.earliest_allowed
        ));
    }

    if start > end {
        std::mem::swap(&mut start, &mut end);
        warnings.push("start and end dates were swapped".to_string());

        if start < policy.earliest_allowed {
            start = policy.earliest_allowed;
            warnings.push(format!(
                "start date adjusted to {} (earliest available data)",
                policy.earliest_allowed
            ));
        }
        if months_between(start, end) > policy.max_months as i32 {
            end = add_months(start, policy.max_months);
            warnings.push(format!(
                "date range limited to {} months to prevent timeout",
                policy.max_months
            ));
        }
    }

    ValidatedRange {
        range: DateRange::new(start, end),
        warnings,
    }
}

/// Calendar-month difference between two dates, ignoring day-of-month.
pub fn months_between(start: NaiveDate, end: NaiveDate) -> i32 {
    (end.year() - start.year()) * 12 + (end.month() as i32 - start.month() as i32)
}

fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months)).unwrap_or(date)
}

/// Last day of the month containing `date`.
pub fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
        .unwrap_or(date)
        .checked_add_months(Months::new(1))
        .unwrap_or(date);
    first.pred_opt().unwrap_or(date)
}

/// Split a validated range into calendar-month-aligned chunks. The output is
/// ordered, contiguous, non-overlapping and exactly covers the input:
/// `chunk[i].end + 1 day == chunk[i+1].start`.
pub fn split_by_month(start: NaiveDate, end: NaiveDate) -> Vec<MonthlyChunk> {
    let mut chunks = Vec::new();
    let mut cursor = start;
    while cursor <= end {
        let chunk_end = last_day_of_month(cursor).min(end);
        chunks.push(DateRange::new(cursor, chunk_end));
        cursor = match chunk_end.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    chunks
}

/// Per-chunk slice of a [`SyncEstimate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkEstimate {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days: i64,
}

/// Dry-run cost estimate for syncing a range, used both by the estimates
/// endpoint and to log expected work before a real historical run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncEstimate {
    pub total_days: i64,
    pub monthly_chunks: usize,
    pub estimated_minutes: u32,
    pub chunks: Vec<ChunkEstimate>,
}

pub fn estimate_sync(start: NaiveDate, end: NaiveDate) -> SyncEstimate {
    let chunks = split_by_month(start, end);
    SyncEstimate {
        total_days: (end - start).num_days() + 1,
        monthly_chunks: chunks.len(),
        estimated_minutes: chunks.len() as u32 * PER_CHUNK_MINUTES,
        chunks: chunks
            .iter()
            .map(|c| ChunkEstimate {
                start: c.start,
                end: c.end,
                days: c.days(),
            })
            .collect(),
    }
}

/// What kind of run a sync batch is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessType {
    DailySync,
    HistoricalSync,
}

impl ProcessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessType::DailySync => "daily_sync",
            ProcessType::HistoricalSync => "historical_sync",
        }
    }
}

/// Terminal state of a sync batch. `Running` exists only between batch
/// creation and the single final update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Partial => "partial",
            BatchStatus::Failed => "failed",
        }
    }
}

/// Overall run status from per-chunk outcomes: every chunk good is
/// `Completed`, a mix is `Partial`, nothing good is `Failed`.
pub fn aggregate_status(succeeded: usize, failed: usize) -> BatchStatus {
    if failed == 0 {
        BatchStatus::Completed
    } else if succeeded > 0 {
        BatchStatus::Partial
    } else {
        BatchStatus::Failed
    }
}

/// One auditable sync run, tracked from creation to terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    pub batch_id: Uuid,
    pub process_type: ProcessType,
    pub status: BatchStatus,
    pub records_processed: i64,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

/// Outcome of one monthly chunk inside a historical run. Appended to the
/// run's ordered result list and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkResult {
    pub chunk_index: usize,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub days: i64,
    pub success: bool,
    pub records_scraped: usize,
    pub records_processed: u64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn validate_clamps_start_to_earliest_allowed() {
        let policy = RangePolicy {
            earliest_allowed: d(2024, 3, 1),
            max_months: 12,
        };
        let out = validate_date_range(d(2024, 1, 1), d(2024, 4, 15), d(2025, 1, 1), &policy);
        assert_eq!(out.range.start, d(2024, 3, 1));
        assert_eq!(out.range.end, d(2024, 4, 15));
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("earliest available data"));
    }

    #[test]
    fn validate_clamps_future_end_to_today() {
        let out = validate_date_range(
            d(2025, 6, 1),
            d(2099, 1, 1),
            d(2025, 6, 10),
            &RangePolicy::default(),
        );
        assert_eq!(out.range.end, d(2025, 6, 10));
        assert!(out.warnings.iter().any(|w| w.contains("future")));
    }

    #[test]
    fn validate_caps_fourteen_month_span_at_twelve() {
        let out = validate_date_range(
            d(2024, 3, 1),
            d(2025, 5, 1),
            d(2025, 6, 1),
            &RangePolicy::default(),
        );
        assert_eq!(out.range.end, d(2025, 3, 1));
        assert!(out.warnings.iter().any(|w| w.contains("12 months")));
    }

    #[test]
    fn validate_swaps_inverted_ranges() {
        let out = validate_date_range(
            d(2024, 6, 1),
            d(2024, 4, 1),
            d(2025, 1, 1),
            &RangePolicy::default(),
        );
        assert!(out.range.start <= out.range.end);
        assert!(out.warnings.iter().any(|w| w.contains("swapped")));
    }

    #[test]
    fn validate_reclamps_floor_and_span_after_swap() {
        // Inverted input whose end predates the earliest-allowed floor: the
        // swap exposes a too-early start and a 29-month span, and both
        // clamps must fire again.
        let out = validate_date_range(
            d(2026, 1, 1),
            d(2023, 1, 1),
            d(2025, 6, 15),
            &RangePolicy::default(),
        );
        assert_eq!(out.range.start, d(2024, 3, 1));
        assert_eq!(out.range.end, d(2025, 3, 1));
        assert!(out.warnings.iter().any(|w| w.contains("swapped")));
        assert!(out.warnings.iter().any(|w| w.contains("earliest available data")));
        assert!(out.warnings.iter().any(|w| w.contains("12 months")));
    }

    #[test]
    fn validate_never_emits_inverted_or_future_output() {
        let today = d(2025, 6, 15);
        let policy = RangePolicy::default();
        let samples = [
            (d(2023, 1, 1), d(2026, 1, 1)),
            (d(2026, 1, 1), d(2023, 1, 1)),
            (d(2025, 6, 15), d(2025, 6, 15)),
            (d(2024, 2, 29), d(2024, 2, 29)),
        ];
        for (s, e) in samples {
            let out = validate_date_range(s, e, today, &policy);
            assert!(out.range.start <= out.range.end);
            assert!(out.range.end <= today);
            assert!(out.range.start >= policy.earliest_allowed);
            assert!(months_between(out.range.start, out.range.end) <= policy.max_months as i32);
        }
    }

    #[test]
    fn split_covers_range_without_gaps_or_overlaps() {
        let start = d(2024, 3, 1);
        let end = d(2024, 7, 20);
        let chunks = split_by_month(start, end);
        assert_eq!(chunks.first().unwrap().start, start);
        assert_eq!(chunks.last().unwrap().end, end);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].end.succ_opt().unwrap(), pair[1].start);
        }
        let total: i64 = chunks.iter().map(|c| c.days()).sum();
        assert_eq!(total, (end - start).num_days() + 1);
    }

    #[test]
    fn split_mid_month_start_truncates_first_chunk() {
        let chunks = split_by_month(d(2024, 3, 1), d(2024, 4, 15));
        assert_eq!(
            chunks,
            vec![
                DateRange::new(d(2024, 3, 1), d(2024, 3, 31)),
                DateRange::new(d(2024, 4, 1), d(2024, 4, 15)),
            ]
        );
    }

    #[test]
    fn split_single_day_yields_one_chunk() {
        let chunks = split_by_month(d(2024, 5, 10), d(2024, 5, 10));
        assert_eq!(chunks, vec![DateRange::new(d(2024, 5, 10), d(2024, 5, 10))]);
    }

    #[test]
    fn split_within_one_month_yields_one_chunk() {
        let chunks = split_by_month(d(2024, 5, 3), d(2024, 5, 28));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn split_handles_leap_february() {
        let chunks = split_by_month(d(2024, 2, 1), d(2024, 3, 1));
        assert_eq!(chunks[0].end, d(2024, 2, 29));
        assert_eq!(chunks[1], DateRange::new(d(2024, 3, 1), d(2024, 3, 1)));
    }

    #[test]
    fn estimate_six_month_range() {
        let est = estimate_sync(d(2024, 3, 1), d(2024, 8, 31));
        assert_eq!(est.monthly_chunks, 6);
        assert_eq!(est.estimated_minutes, 12);
        assert_eq!(est.total_days, 184);
        assert_eq!(est.chunks.len(), 6);
    }

    #[test]
    fn estimate_nine_month_range() {
        let est = estimate_sync(d(2024, 3, 1), d(2024, 11, 30));
        assert_eq!(est.monthly_chunks, 9);
        assert_eq!(est.estimated_minutes, 18);
    }

    #[test]
    fn record_date_parses_both_export_formats() {
        assert_eq!(
            parse_record_date("2025-05-09 14:30:00"),
            Some(d(2025, 5, 9))
        );
        assert_eq!(
            parse_record_date("09/05/2025 14:30:00"),
            Some(d(2025, 5, 9))
        );
        assert_eq!(parse_record_date("2025-05-09"), Some(d(2025, 5, 9)));
        assert_eq!(parse_record_date(""), None);
        assert_eq!(parse_record_date("not-a-date"), None);
    }

    #[test]
    fn aggregate_status_matrix() {
        assert_eq!(aggregate_status(4, 0), BatchStatus::Completed);
        assert_eq!(aggregate_status(3, 1), BatchStatus::Partial);
        assert_eq!(aggregate_status(0, 2), BatchStatus::Failed);
        assert_eq!(aggregate_status(0, 0), BatchStatus::Completed);
    }
}
