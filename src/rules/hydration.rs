/// Reminds the user to drink when they are under half their daily goal late
/// in the day.
///
/// The check opens 12 hours before the user's bedtime. `bedtime` is a bare
/// time of day, so it is anchored to *today* in the evaluation clock's
/// offset. The window has no upper edge: once open it stays open until the
/// date rolls over.
///
/// NOTE: a bedtime just after midnight (e.g. "12:30 AM") anchors to the start
/// of today, so its window opened yesterday evening and the check is open all
/// day. This mirrors how the tracking app has always behaved and is left
/// as-is until product decides what "tonight" should mean.
use super::{RuleContext, SkipReason, Verdict};
use crate::model::{HydrationRecord, UserProfile};
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, TimeZone};

pub const KEY: &str = "hydration_deficit";
pub const WINDOW_HOURS: i64 = 12;
pub const MESSAGE: &str =
    "You're below 50% of your daily hydration goal! Time to drink some water. 💧";

const BEDTIME_FORMATS: &[&str] = &["%I:%M %p", "%I:%M%p", "%H:%M"];

/// Parse "10:00 PM", "9:30pm" or "22:00".
pub fn parse_bedtime(raw: &str) -> Option<NaiveTime> {
    let trimmed = raw.trim().to_ascii_uppercase();
    BEDTIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(&trimmed, fmt).ok())
}

/// Start of the pre-bedtime window: today's `bedtime` minus 12 hours.
pub fn window_start(bedtime: NaiveTime, now: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    let bedtime_today = now.date_naive().and_time(bedtime);
    let anchored = now.offset().from_local_datetime(&bedtime_today).single()?;
    Some(anchored - Duration::hours(WINDOW_HOURS))
}

/// First gate: is `now` inside the user's pre-bedtime window?
pub fn check_window(profile: &UserProfile, ctx: &RuleContext) -> Result<(), SkipReason> {
    let Some(raw) = profile.bedtime.as_deref().filter(|b| !b.trim().is_empty()) else {
        return Err(SkipReason::MissingField("bedtime"));
    };
    let start = parse_bedtime(raw)
        .and_then(|t| window_start(t, ctx.now))
        .ok_or_else(|| SkipReason::InvalidBedtime(raw.to_owned()))?;

    if ctx.now > start {
        Ok(())
    } else {
        Err(SkipReason::OutsideBedtimeWindow)
    }
}

/// A zero goal or intake counts as not yet tracked.
fn tracked(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0)
}

/// Second gate, once the window is open: is intake under half the goal?
pub fn evaluate(record: &HydrationRecord, _ctx: &RuleContext) -> Verdict {
    let Some(daily_goal) = tracked(record.daily_goal) else {
        return Verdict::skip(SkipReason::MissingField("dailyGoal"));
    };
    let Some(current_intake) = tracked(record.current_intake) else {
        return Verdict::skip(SkipReason::MissingField("currentIntake"));
    };

    if record.is_notified() {
        return Verdict::skip(SkipReason::AlreadyNotified);
    }

    if current_intake < daily_goal / 2.0 {
        Verdict::Notify(MESSAGE.to_owned())
    } else {
        Verdict::skip(SkipReason::AboveThreshold)
    }
}
