//! Clocking state machine and worked-hours derivation.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::db::models::ClockingType;

/// Where a user stands, judged by their latest clocking record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClockState {
    Out,
    In,
    Break,
}

impl ClockState {
    pub fn after(last: Option<ClockingType>) -> Self {
        match last {
            None | Some(ClockingType::Out) => ClockState::Out,
            Some(ClockingType::In) => ClockState::In,
            Some(ClockingType::Break) => ClockState::Break,
        }
    }

    /// Whether a record of type `next` may follow this state.
    pub fn accepts(self, next: ClockingType) -> bool {
        matches!(
            (self, next),
            (ClockState::Out, ClockingType::In)
                | (ClockState::In, ClockingType::Break)
                | (ClockState::In, ClockingType::Out)
                | (ClockState::Break, ClockingType::In)
                | (ClockState::Break, ClockingType::Out)
        )
    }

    pub fn describe_rejection(self, next: ClockingType) -> String {
        match (self, next) {
            (ClockState::Out, ClockingType::Break) => "Cannot take a break while clocked out".to_string(),
            (ClockState::Out, ClockingType::Out) => "Already clocked out".to_string(),
            (ClockState::In, ClockingType::In) => "Already clocked in".to_string(),
            (ClockState::Break, ClockingType::Break) => "Already on a break".to_string(),
            _ => format!("Invalid clocking transition {self:?} -> {next:?}"),
        }
    }
}

/// Worked hours for one session, rounded to two decimals.
///
/// `session` holds the records after the previous OUT, oldest first. Every IN
/// opens a segment that the next BREAK (or the closing OUT at `out_at`) ends,
/// so time before a break counts and the break itself does not. `None` when
/// the session has no IN or a timestamp fails to parse.
pub fn worked_hours(session: &[(ClockingType, String)], out_at: &str) -> Option<f64> {
    let mut seconds = 0i64;
    let mut open: Option<DateTime<FixedOffset>> = None;
    let mut clocked_in = false;

    for (kind, timestamp) in session {
        let at = DateTime::parse_from_rfc3339(timestamp).ok()?;
        match kind {
            ClockingType::In => {
                clocked_in = true;
                if open.is_none() {
                    open = Some(at);
                }
            }
            ClockingType::Break | ClockingType::Out => {
                if let Some(start) = open.take() {
                    seconds += (at - start).num_seconds().max(0);
                }
            }
        }
    }
    if !clocked_in {
        return None;
    }

    let end = DateTime::parse_from_rfc3339(out_at).ok()?;
    if let Some(start) = open {
        seconds += (end - start).num_seconds().max(0);
    }
    Some((seconds as f64 / 36.0).round() / 100.0)
}
