/// Reminder jobs — scan a collection, run the rule for each entity, dispatch,
/// then set the dedup flag.
///
/// Every entity is evaluated in its own task so one slow push does not hold
/// up the rest of the scan, and the scan only returns once all of them have
/// been joined. That way "job finished" means every flag write has landed.
///
/// Failure policy:
///   scan itself fails             → the whole job returns `Err`
///   one entity's read/write fails → logged, counted as `failed`, scan continues
///   push fails / no token         → logged by the dispatcher, flag still set
use crate::{
    dispatcher::Dispatcher,
    model::{decode, notified_update, CaffeineRecord, Collection, HydrationRecord, UserProfile},
    rules::{caffeine, hydration, RuleContext, SkipReason, Verdict},
    scanner,
    store::{DocumentStore, StoreError},
};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Caffeine,
    Hydration,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Caffeine  => f.write_str(caffeine::KEY),
            Job::Hydration => f.write_str(hydration::KEY),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub scanned:  usize,
    pub notified: usize,
    pub skipped:  usize,
    pub failed:   usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityOutcome {
    Notified,
    Skipped,
    Failed,
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Evaluator {
    store:      Arc<dyn DocumentStore>,
    dispatcher: Dispatcher,
}

impl Evaluator {
    pub fn new(store: Arc<dyn DocumentStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    pub async fn run(&self, job: Job, now: DateTime<FixedOffset>) -> Result<ScanReport, StoreError> {
        match job {
            Job::Caffeine  => self.run_caffeine_check(now).await,
            Job::Hydration => self.run_hydration_check(now).await,
        }
    }

    pub async fn run_caffeine_check(&self, now: DateTime<FixedOffset>) -> Result<ScanReport, StoreError> {
        tracing::info!("Checking caffeine events for notifications");
        let ctx = RuleContext { now };
        let records = scanner::scan::<CaffeineRecord>(self.store.as_ref(), Collection::Caffeine).await?;

        let mut tasks = JoinSet::new();
        for (user_id, record) in records {
            let this = self.clone();
            tasks.spawn(async move {
                let verdict = caffeine::evaluate(&record, &ctx);
                this.apply(Collection::Caffeine, &user_id, verdict).await
            });
        }
        Ok(join_all(Job::Caffeine, tasks).await)
    }

    pub async fn run_hydration_check(&self, now: DateTime<FixedOffset>) -> Result<ScanReport, StoreError> {
        tracing::info!("Checking hydration levels for reminders");
        let ctx = RuleContext { now };
        let profiles = scanner::scan::<UserProfile>(self.store.as_ref(), Collection::Users).await?;

        let mut tasks = JoinSet::new();
        for (user_id, profile) in profiles {
            let this = self.clone();
            tasks.spawn(async move {
                match this.hydration_verdict(&user_id, &profile, &ctx).await {
                    Ok(verdict) => this.apply(Collection::Hydration, &user_id, verdict).await,
                    Err(e) => {
                        tracing::error!("Hydration lookup for user {} failed: {}", user_id, e);
                        EntityOutcome::Failed
                    }
                }
            });
        }
        Ok(join_all(Job::Hydration, tasks).await)
    }

    async fn hydration_verdict(
        &self,
        user_id: &str,
        profile: &UserProfile,
        ctx:     &RuleContext,
    ) -> Result<Verdict, StoreError> {
        if let Err(reason) = hydration::check_window(profile, ctx) {
            return Ok(Verdict::skip(reason));
        }

        let Some(doc) = self.store.get(Collection::Hydration, user_id).await? else {
            return Ok(Verdict::skip(SkipReason::MissingField("hydration")));
        };
        match decode::<HydrationRecord>(&doc) {
            Ok(record) => Ok(hydration::evaluate(&record, ctx)),
            Err(e) => {
                tracing::warn!("Skipping malformed hydration/{}: {}", user_id, e);
                Ok(Verdict::skip(SkipReason::MissingField("hydration")))
            }
        }
    }

    async fn apply(&self, collection: Collection, user_id: &str, verdict: Verdict) -> EntityOutcome {
        let message = match verdict {
            Verdict::Skip(reason) => {
                tracing::debug!("No {} notification for user {}: {}", collection, user_id, reason);
                return EntityOutcome::Skipped;
            }
            Verdict::Notify(message) => message,
        };

        if let Err(e) = self.dispatcher.dispatch(user_id, &message).await {
            tracing::error!("Dispatch for user {} aborted: {}", user_id, e);
            return EntityOutcome::Failed;
        }

        // Delivery is best-effort; the flag is set whatever the push outcome was.
        match self.store.update(collection, user_id, notified_update(true)).await {
            Ok(()) => {
                tracing::info!("Marked {}/{} as notified", collection, user_id);
                EntityOutcome::Notified
            }
            Err(e) => {
                tracing::error!("Could not mark {}/{} as notified: {}", collection, user_id, e);
                EntityOutcome::Failed
            }
        }
    }
}

async fn join_all(job: Job, mut tasks: JoinSet<EntityOutcome>) -> ScanReport {
    let mut report = ScanReport::default();
    while let Some(joined) = tasks.join_next().await {
        report.scanned += 1;
        match joined {
            Ok(EntityOutcome::Notified) => report.notified += 1,
            Ok(EntityOutcome::Skipped)  => report.skipped  += 1,
            Ok(EntityOutcome::Failed)   => report.failed   += 1,
            Err(e) => {
                tracing::error!("{} entity task panicked: {}", job, e);
                report.failed += 1;
            }
        }
    }
    tracing::info!(
        "{} scan complete: scanned={} notified={} skipped={} failed={}",
        job, report.scanned, report.notified, report.skipped, report.failed
    );
    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PushConfig;
    use crate::flags;
    use crate::testing::{doc, MemoryStore, RecordingTransport};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn now() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2024-06-01T11:00:00+00:00").unwrap()
    }

    fn evaluator(store: &Arc<MemoryStore>, transport: &Arc<RecordingTransport>) -> Evaluator {
        let dispatcher = Dispatcher::new(store.clone(), transport.clone(), &PushConfig::default());
        Evaluator::new(store.clone(), dispatcher)
    }

    fn caf_end_in(minutes: i64) -> serde_json::Value {
        json!((now() + Duration::minutes(minutes)).with_timezone(&Utc).to_rfc3339())
    }

    #[tokio::test]
    async fn caffeine_fires_once_then_dedups() {
        let (store, _events) = MemoryStore::new();
        let transport = RecordingTransport::new();
        store.insert(Collection::Users, "u1", doc(json!({ "fcmToken": "tok-1" })));
        store.insert(Collection::Caffeine, "u1", doc(json!({ "cafEnd": caf_end_in(10) })));

        let ev = evaluator(&store, &transport);
        let first = ev.run_caffeine_check(now()).await.unwrap();
        assert_eq!(first, ScanReport { scanned: 1, notified: 1, skipped: 0, failed: 0 });
        assert_eq!(transport.bodies(), vec!["Your caffeine crash will begin in 10 minutes!".to_owned()]);
        assert_eq!(store.doc(Collection::Caffeine, "u1").unwrap()["notified"], true);

        let second = ev.run_caffeine_check(now()).await.unwrap();
        assert_eq!(second.notified, 0);
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn caffeine_boundaries_across_users() {
        let (store, _events) = MemoryStore::new();
        let transport = RecordingTransport::new();
        for (user, minutes) in [("edge", 15), ("now", 0), ("far", 30), ("past", -5)] {
            store.insert(Collection::Users, user, doc(json!({ "fcmToken": format!("tok-{}", user) })));
            store.insert(Collection::Caffeine, user, doc(json!({ "cafEnd": caf_end_in(minutes) })));
        }
        store.insert(Collection::Caffeine, "blank", doc(json!({ "mgConsumed": 80 })));

        let report = evaluator(&store, &transport).run_caffeine_check(now()).await.unwrap();
        assert_eq!(report, ScanReport { scanned: 5, notified: 1, skipped: 4, failed: 0 });
        assert_eq!(transport.sent()[0].0, "tok-edge");
        assert!(store.doc(Collection::Caffeine, "past").unwrap().get("notified").is_none());
    }

    #[tokio::test]
    async fn flag_set_even_without_token_or_delivery() {
        let (store, _events) = MemoryStore::new();
        let transport = RecordingTransport::failing();
        store.insert(Collection::Users, "has_token", doc(json!({ "fcmToken": "tok" })));
        store.insert(Collection::Caffeine, "has_token", doc(json!({ "cafEnd": caf_end_in(5) })));
        store.insert(Collection::Caffeine, "no_profile", doc(json!({ "cafEnd": caf_end_in(5) })));

        let report = evaluator(&store, &transport).run_caffeine_check(now()).await.unwrap();
        assert_eq!(report.notified, 2);
        assert_eq!(store.doc(Collection::Caffeine, "has_token").unwrap()["notified"], true);
        assert_eq!(store.doc(Collection::Caffeine, "no_profile").unwrap()["notified"], true);
    }

    #[tokio::test]
    async fn one_failing_entity_does_not_abort_scan() {
        let (store, _events) = MemoryStore::new();
        let transport = RecordingTransport::new();
        for user in ["ok", "broken"] {
            store.insert(Collection::Users, user, doc(json!({ "fcmToken": format!("tok-{}", user) })));
            store.insert(Collection::Caffeine, user, doc(json!({ "cafEnd": caf_end_in(3) })));
        }
        store.fail_writes_for("broken");

        let report = evaluator(&store, &transport).run_caffeine_check(now()).await.unwrap();
        assert_eq!(report, ScanReport { scanned: 2, notified: 1, skipped: 0, failed: 1 });
        assert_eq!(store.doc(Collection::Caffeine, "ok").unwrap()["notified"], true);
    }

    #[tokio::test]
    async fn store_outage_fails_the_job() {
        let (store, _events) = MemoryStore::new();
        store.set_unavailable(true);
        let transport = RecordingTransport::new();
        let res = evaluator(&store, &transport).run(Job::Hydration, now()).await;
        assert!(matches!(res, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn hydration_fires_inside_window() {
        let (store, _events) = MemoryStore::new();
        let transport = RecordingTransport::new();
        store.insert(Collection::Users, "u1", doc(json!({ "bedtime": "10:00 PM", "fcmToken": "tok-1" })));
        store.insert(Collection::Hydration, "u1", doc(json!({ "dailyGoal": 2000, "currentIntake": 500 })));

        let ev = evaluator(&store, &transport);
        let report = ev.run_hydration_check(now()).await.unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(transport.bodies(), vec![hydration::MESSAGE.to_owned()]);
        assert_eq!(store.doc(Collection::Hydration, "u1").unwrap()["notified"], true);

        ev.run_hydration_check(now()).await.unwrap();
        assert_eq!(transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn hydration_threshold_is_strict() {
        let (store, _events) = MemoryStore::new();
        let transport = RecordingTransport::new();
        store.insert(Collection::Users, "half", doc(json!({ "bedtime": "10:00 PM", "fcmToken": "tok-half" })));
        store.insert(Collection::Hydration, "half", doc(json!({ "dailyGoal": 2000, "currentIntake": 1000 })));
        store.insert(Collection::Users, "under", doc(json!({ "bedtime": "10:00 PM", "fcmToken": "tok-under" })));
        store.insert(Collection::Hydration, "under", doc(json!({ "dailyGoal": 2000, "currentIntake": 999 })));

        let report = evaluator(&store, &transport).run_hydration_check(now()).await.unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(transport.sent()[0].0, "tok-under");
        assert!(store.doc(Collection::Hydration, "half").unwrap().get("notified").is_none());
    }

    #[tokio::test]
    async fn hydration_skips_outside_window_and_missing_data() {
        let (store, _events) = MemoryStore::new();
        let transport = RecordingTransport::new();
        // window opens at 11:30 — not yet
        store.insert(Collection::Users, "early", doc(json!({ "bedtime": "11:30 PM", "fcmToken": "a" })));
        store.insert(Collection::Hydration, "early", doc(json!({ "dailyGoal": 2000, "currentIntake": 0 })));
        // no hydration doc at all
        store.insert(Collection::Users, "untracked", doc(json!({ "bedtime": "10:00 PM", "fcmToken": "b" })));
        // no bedtime
        store.insert(Collection::Users, "nobed", doc(json!({ "fcmToken": "c" })));
        store.insert(Collection::Hydration, "nobed", doc(json!({ "dailyGoal": 2000, "currentIntake": 0 })));

        let report = evaluator(&store, &transport).run_hydration_check(now()).await.unwrap();
        assert_eq!(report, ScanReport { scanned: 3, notified: 0, skipped: 3, failed: 0 });
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn zero_intake_sends_nothing() {
        let (store, _events) = MemoryStore::new();
        let transport = RecordingTransport::new();
        store.insert(Collection::Users, "u1", doc(json!({ "bedtime": "10:00 PM", "fcmToken": "tok-1" })));
        store.insert(Collection::Hydration, "u1", doc(json!({ "dailyGoal": 2000, "currentIntake": 0 })));

        let report = evaluator(&store, &transport).run_hydration_check(now()).await.unwrap();
        assert_eq!(report, ScanReport { scanned: 1, notified: 0, skipped: 1, failed: 0 });
        assert!(transport.sent().is_empty());
        assert!(store.doc(Collection::Hydration, "u1").unwrap().get("notified").is_none());
    }

    #[tokio::test]
    async fn new_data_re_arms_notification() {
        let (store, mut events) = MemoryStore::new();
        let transport = RecordingTransport::new();
        store.insert(Collection::Users, "u1", doc(json!({ "fcmToken": "tok-1" })));
        store.insert(Collection::Caffeine, "u1", doc(json!({ "cafEnd": caf_end_in(10) })));

        let ev = evaluator(&store, &transport);
        ev.run_caffeine_check(now()).await.unwrap();
        // the scan's own flag write must not reset anything
        assert_eq!(flags::drain(store.as_ref(), &mut events).await.unwrap(), 0);

        store
            .update(Collection::Caffeine, "u1", doc(json!({ "cafEnd": caf_end_in(12) })))
            .await
            .unwrap();
        assert_eq!(flags::drain(store.as_ref(), &mut events).await.unwrap(), 1);

        ev.run_caffeine_check(now()).await.unwrap();
        assert_eq!(
            transport.bodies(),
            vec![caffeine::message(10), caffeine::message(12)]
        );
    }
}
