/// Warns the user shortly before their caffeine crash begins.
///
/// `cafEnd` is written by the tracking app whenever caffeine is logged. The
/// warning is eligible while the crash is 1–15 whole minutes away; the
/// minute count is truncated, so 10m59s reads as "10 minutes" and anything
/// under a full minute never fires.
use super::{RuleContext, SkipReason, Verdict};
use crate::model::{CaffeineRecord, FIELD_CAF_END};

pub const KEY: &str = "caffeine_crash";
pub const CRASH_WINDOW_MINUTES: i64 = 15;

pub fn message(diff_minutes: i64) -> String {
    format!("Your caffeine crash will begin in {} minutes!", diff_minutes)
}

pub fn evaluate(record: &CaffeineRecord, ctx: &RuleContext) -> Verdict {
    let Some(caf_end) = record.caf_end else {
        return Verdict::skip(SkipReason::MissingField(FIELD_CAF_END));
    };

    let remaining = caf_end.signed_duration_since(ctx.now);
    if remaining < chrono::Duration::zero() {
        return Verdict::skip(SkipReason::Stale);
    }

    if record.is_notified() {
        return Verdict::skip(SkipReason::AlreadyNotified);
    }

    let diff_minutes = remaining.num_minutes();
    if diff_minutes > 0 && diff_minutes <= CRASH_WINDOW_MINUTES {
        Verdict::Notify(message(diff_minutes))
    } else {
        Verdict::skip(SkipReason::OutsideCrashWindow { diff_minutes })
    }
}
