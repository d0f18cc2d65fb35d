use crate::error::{ArchiveError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CutoffUnit {
    Hours,
    Days,
}

impl FromStr for CutoffUnit {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hour" | "hours" | "h" => Ok(CutoffUnit::Hours),
            "day" | "days" | "d" => Ok(CutoffUnit::Days),
            other => Err(ArchiveError::Config(format!(
                "Unknown cutoff unit '{}'. Must be hours or days.",
                other
            ))),
        }
    }
}

/// The instant separating records to archive from records to keep live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cutoff {
    /// No age filter: every leaf is selected, including future-dated ones
    All,
    /// Leaves stamped at or before this instant are selected
    Before(DateTime<Utc>),
}

impl Cutoff {
    /// Whether a leaf keyed by `timestamp_ms` (milliseconds since epoch) is selected
    pub fn admits(&self, timestamp_ms: i64) -> bool {
        match self {
            Cutoff::All => true,
            Cutoff::Before(instant) => timestamp_ms <= instant.timestamp_millis(),
        }
    }

    pub fn instant(&self) -> Option<DateTime<Utc>> {
        match self {
            Cutoff::All => None,
            Cutoff::Before(instant) => Some(*instant),
        }
    }
}

impl std::fmt::Display for Cutoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cutoff::All => f.write_str("all"),
            Cutoff::Before(instant) => write!(f, "{}", instant.to_rfc3339()),
        }
    }
}

/// Cutoff `amount` units before `now`; an amount of zero means archive everything.
pub fn compute_cutoff(amount: u32, unit: CutoffUnit, now: DateTime<Utc>) -> Cutoff {
    if amount == 0 {
        return Cutoff::All;
    }
    let age = match unit {
        CutoffUnit::Hours => Duration::hours(i64::from(amount)),
        CutoffUnit::Days => Duration::days(i64::from(amount)),
    };
    Cutoff::Before(now - age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_zero_amount_is_archive_all() {
        let now = Utc::now();
        assert_eq!(compute_cutoff(0, CutoffUnit::Hours, now), Cutoff::All);
        assert_eq!(compute_cutoff(0, CutoffUnit::Days, now), Cutoff::All);
        assert!(Cutoff::All.admits(i64::MAX));
    }

    #[test]
    fn test_compute_cutoff_subtracts_age() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        assert_eq!(
            compute_cutoff(24, CutoffUnit::Hours, now),
            Cutoff::Before(Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap())
        );
        assert_eq!(
            compute_cutoff(7, CutoffUnit::Days, now),
            Cutoff::Before(Utc.with_ymd_and_hms(2024, 3, 3, 12, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_admits_is_inclusive() {
        let cutoff = Cutoff::Before(Utc.timestamp_millis_opt(2000).unwrap());
        assert!(cutoff.admits(1999));
        assert!(cutoff.admits(2000));
        assert!(!cutoff.admits(2001));
    }

    #[test]
    fn test_parse_unit() {
        assert_eq!("Days".parse::<CutoffUnit>().unwrap(), CutoffUnit::Days);
        assert_eq!("h".parse::<CutoffUnit>().unwrap(), CutoffUnit::Hours);
        assert!("weeks".parse::<CutoffUnit>().is_err());
    }
}
