pub mod caffeine;
pub mod hydration;

use chrono::{DateTime, FixedOffset};
use std::fmt;

/// Read-only context passed to every rule evaluator.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext {
    /// Evaluation clock. The offset anchors time-of-day fields to a calendar day.
    pub now: DateTime<FixedOffset>,
}

/// What a rule decided for one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Send this message, then set the dedup flag.
    Notify(String),
    Skip(SkipReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    MissingField(&'static str),
    /// The event this record predicts has already happened.
    Stale,
    AlreadyNotified,
    OutsideCrashWindow { diff_minutes: i64 },
    OutsideBedtimeWindow,
    InvalidBedtime(String),
    AboveThreshold,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::MissingField(field)    => write!(f, "no {} field", field),
            SkipReason::Stale                  => f.write_str("time is in the past"),
            SkipReason::AlreadyNotified        => f.write_str("notification already sent"),
            SkipReason::OutsideCrashWindow { diff_minutes } => {
                write!(f, "outside crash window (diff: {} minutes)", diff_minutes)
            }
            SkipReason::OutsideBedtimeWindow   => f.write_str("not within 12-hour window"),
            SkipReason::InvalidBedtime(raw)    => write!(f, "unparseable bedtime '{}'", raw),
            SkipReason::AboveThreshold         => f.write_str("at or above 50% of hydration goal"),
        }
    }
}

impl Verdict {
    pub fn skip(reason: SkipReason) -> Self {
        Verdict::Skip(reason)
    }
}
