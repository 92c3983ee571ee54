// ABOUTME: Vocabulary quiz module
// ABOUTME: Sentence analysis through a hosted language model and per-word error history

mod analyzer;
mod history;

pub use analyzer::{
    AnalysisResult, AnalyzeError, Analyzer, LlmAnalyzer, LlmConfig, WordInfo,
};
pub use history::{
    HistoryEntry, HistoryError, QuizAnswer, QuizHistory, QuizSubmission, SubmitOutcome,
    Vocabulary, WordOccurrence,
};

use std::time::{SystemTime, UNIX_EPOCH};

/// Format a time as `YYYY-MM-DD HH:MM:SS` (UTC)
pub fn format_timestamp(time: SystemTime) -> String {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);

    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        year,
        month,
        day,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60
    )
}

/// Current time as `YYYY-MM-DD HH:MM:SS` (UTC)
pub fn now_timestamp() -> String {
    format_timestamp(SystemTime::now())
}

/// Days since 1970-01-01 to a proleptic Gregorian (year, month, day)
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
