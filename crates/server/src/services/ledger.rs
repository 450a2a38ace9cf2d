//! Read-side aggregation over the points ledger.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDate};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: String,
    pub name: String,
    pub course_id: Option<String>,
    pub total: i64,
}

/// A student's summed total, before ranking.
#[derive(Debug, Clone)]
pub struct StudentTotal {
    pub user_id: String,
    pub name: String,
    pub course_id: Option<String>,
    pub total: i64,
}

/// Orders by total (highest first) and assigns competition ranks: equal totals
/// share a rank and the next distinct total skips ahead (1, 1, 3).
pub fn rank_leaderboard(mut totals: Vec<StudentTotal>) -> Vec<LeaderboardEntry> {
    totals.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.name.cmp(&b.name)));

    let mut entries = Vec::with_capacity(totals.len());
    let mut rank = 0u32;
    let mut previous: Option<i64> = None;

    for (index, student) in totals.into_iter().enumerate() {
        if previous != Some(student.total) {
            rank = index as u32 + 1;
            previous = Some(student.total);
        }
        entries.push(LeaderboardEntry {
            rank,
            user_id: student.user_id,
            name: student.name,
            course_id: student.course_id,
            total: student.total,
        });
    }

    entries
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryDay {
    pub date: NaiveDate,
    pub amount: i64,
    pub cumulative: i64,
}

/// Buckets ledger rows `(created_at, amount)` into one entry per calendar day
/// (UTC) for the `days` days ending at `today`, oldest first. Grants before the
/// window seed the running total. Rows with unparseable timestamps are ignored.
pub fn daily_history(entries: &[(String, i64)], today: NaiveDate, days: u32) -> Vec<HistoryDay> {
    if days == 0 {
        return Vec::new();
    }
    let start = today - Duration::days(i64::from(days) - 1);

    let mut opening = 0i64;
    let mut by_day: BTreeMap<NaiveDate, i64> = BTreeMap::new();
    for (created_at, amount) in entries {
        let Ok(ts) = DateTime::parse_from_rfc3339(created_at) else {
            continue;
        };
        let day = ts.naive_utc().date();
        if day < start {
            opening += amount;
        } else if day <= today {
            *by_day.entry(day).or_default() += amount;
        }
    }

    let mut cumulative = opening;
    start
        .iter_days()
        .take(days as usize)
        .map(|date| {
            let amount = by_day.get(&date).copied().unwrap_or(0);
            cumulative += amount;
            HistoryDay {
                date,
                amount,
                cumulative,
            }
        })
        .collect()
}
