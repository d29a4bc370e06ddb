/// Notified-flag controller — clears the dedup flag when fresh tracking data
/// arrives, so the next scan may notify again.
///
/// Runs on every write event from the store. A reset only happens when the
/// *write itself* carried the tracked field (`cafEnd` for caffeine,
/// `currentIntake` for hydration). Flag-only writes — including the scan's
/// own `notified: true` and this controller's `notified: false` — never
/// match, which keeps the two from re-triggering each other.
use crate::{
    model::{notified_update, Collection, FIELD_CAF_END, FIELD_CURRENT_INTAKE},
    store::{DocumentStore, StoreError, WriteEvent, WriteEvents},
};
use std::sync::Arc;

/// The field whose rewrite invalidates a prior notification, per collection.
fn tracked_field(collection: Collection) -> Option<&'static str> {
    match collection {
        Collection::Caffeine  => Some(FIELD_CAF_END),
        Collection::Hydration => Some(FIELD_CURRENT_INTAKE),
        Collection::Users     => None,
    }
}

/// Whether `event` should clear the record's `notified` flag.
pub fn needs_reset(event: &WriteEvent) -> bool {
    let Some(field) = tracked_field(event.collection) else {
        return false;
    };
    if !event.touched(field) {
        return false;
    }
    match event.collection {
        // Any intake write re-arms, including an explicit null.
        Collection::Hydration => true,
        // A cleared crash time has nothing to notify about.
        _ => event
            .snapshot
            .get(field)
            .is_some_and(|v| !v.is_null() && v.as_str() != Some("")),
    }
}

/// Apply the reset for one write event. Returns whether a reset was written.
pub async fn handle(store: &dyn DocumentStore, event: &WriteEvent) -> Result<bool, StoreError> {
    if !needs_reset(event) {
        return Ok(false);
    }
    store.update(event.collection, &event.key, notified_update(false)).await?;
    tracing::info!(
        "Reset 'notified' flag for {}/{} as {} was updated",
        event.collection,
        event.key,
        tracked_field(event.collection).unwrap_or_default()
    );
    Ok(true)
}

/// Drain every write event already queued, without waiting for more.
/// Used by one-shot CLI commands that write and then exit.
pub async fn drain(store: &dyn DocumentStore, events: &mut WriteEvents) -> Result<usize, StoreError> {
    let mut resets = 0;
    while let Ok(event) = events.try_recv() {
        if handle(store, &event).await? {
            resets += 1;
        }
    }
    Ok(resets)
}

/// Trigger loop: consumes write events until the store's sender is dropped.
pub async fn run(store: Arc<dyn DocumentStore>, mut events: WriteEvents) {
    tracing::info!("Notified-flag controller listening for writes");
    while let Some(event) = events.recv().await {
        if let Err(e) = handle(store.as_ref(), &event).await {
            tracing::error!("Flag reset for {}/{} failed: {}", event.collection, event.key, e);
        }
    }
    tracing::info!("Write trigger closed — flag controller exiting");
}
