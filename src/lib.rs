pub mod config;
pub mod dispatcher;
pub mod flags;
pub mod jobs;
pub mod logging;
pub mod model;
pub mod rules;
pub mod scanner;
pub mod scheduler;
pub mod store;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use dispatcher::{Dispatcher, FcmTransport};
use jobs::Evaluator;
use store::{DocumentStore, SqliteStore, StoreError, WriteEvents};

/// Everything a command needs: the store handle, its write trigger, and an
/// evaluator wired to the production push transport.
pub struct Service {
    pub config:    config::AppConfig,
    pub sqlite:    SqliteStore,
    pub store:     Arc<dyn DocumentStore>,
    pub events:    WriteEvents,
    pub evaluator: Evaluator,
}

impl Service {
    /// Open the store and wire the pipeline:
    /// store -> scanner -> rules -> dispatcher -> transport, plus the write trigger.
    pub fn open(config: config::AppConfig) -> Result<Service, StoreError> {
        let (sqlite, events) = SqliteStore::open(&config.db_path)?;
        let store: Arc<dyn DocumentStore> = Arc::new(sqlite.clone());
        let transport = Arc::new(FcmTransport::new(&config.push));
        let dispatcher = Dispatcher::new(store.clone(), transport, &config.push);
        let evaluator = Evaluator::new(store.clone(), dispatcher);

        Ok(Service { config, sqlite, store, events, evaluator })
    }

    /// Run both scheduled jobs and the flag controller until Ctrl-C.
    pub async fn serve(self) -> anyhow::Result<()> {
        let Service { config, sqlite, store, events, evaluator } = self;
        tracing::info!(
            "Health reminder jobs starting — caffeine every {}m, hydration every {}m",
            config.caffeine.interval_minutes,
            config.hydration.interval_minutes
        );
        let result = scheduler::run(config, evaluator, store, events).await;
        sqlite.shutdown();
        result
    }
}
