//! In-memory fakes for the store and push seams. Test builds only.

use crate::{
    dispatcher::{PushPayload, PushTransport, TransportError},
    model::{Collection, Document},
    store::{merge_fields, DocumentStore, StoreError, WriteEvent, WriteEvents},
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub fn doc(v: serde_json::Value) -> Document {
    v.as_object().cloned().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

pub struct MemoryStore {
    docs:        Mutex<HashMap<(Collection, String), Document>>,
    events:      mpsc::UnboundedSender<WriteEvent>,
    unavailable: AtomicBool,
    /// Keys whose writes fail, to exercise per-entity error containment.
    failing:     Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> (Arc<MemoryStore>, WriteEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = MemoryStore {
            docs:        Mutex::new(HashMap::new()),
            events:      tx,
            unavailable: AtomicBool::new(false),
            failing:     Mutex::new(Vec::new()),
        };
        (Arc::new(store), rx)
    }

    /// Seed a document without publishing a write event.
    pub fn insert(&self, collection: Collection, key: &str, doc: Document) {
        self.docs.lock().unwrap().insert((collection, key.to_owned()), doc);
    }

    pub fn doc(&self, collection: Collection, key: &str) -> Option<Document> {
        self.docs.lock().unwrap().get(&(collection, key.to_owned())).cloned()
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn fail_writes_for(&self, key: &str) {
        self.failing.lock().unwrap().push(key.to_owned());
    }

    fn check_up(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked down".to_owned()));
        }
        Ok(())
    }

    fn write(&self, collection: Collection, key: &str, fields: Document, create: bool) -> Result<(), StoreError> {
        self.check_up()?;
        if self.failing.lock().unwrap().iter().any(|k| k == key) {
            return Err(StoreError::Unavailable(format!("write to {} refused", key)));
        }
        let mut docs = self.docs.lock().unwrap();
        let slot = (collection, key.to_owned());
        let base = match docs.get(&slot) {
            Some(existing) => existing.clone(),
            None if create => Document::new(),
            None => return Err(StoreError::NotFound { collection, key: key.to_owned() }),
        };
        let merged = merge_fields(base, &fields);
        docs.insert(slot, merged.clone());
        let _ = self.events.send(WriteEvent {
            collection,
            key: key.to_owned(),
            written_fields: fields.keys().cloned().collect(),
            snapshot: merged,
        });
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn scan(&self, collection: Collection) -> Result<Vec<(String, Document)>, StoreError> {
        self.check_up()?;
        Ok(self
            .docs
            .lock()
            .unwrap()
            .iter()
            .filter(|((c, _), _)| *c == collection)
            .map(|((_, k), d)| (k.clone(), d.clone()))
            .collect())
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>, StoreError> {
        self.check_up()?;
        Ok(self.doc(collection, key))
    }

    async fn update(&self, collection: Collection, key: &str, fields: Document) -> Result<(), StoreError> {
        self.write(collection, key, fields, false)
    }

    async fn upsert(&self, collection: Collection, key: &str, fields: Document) -> Result<(), StoreError> {
        self.write(collection, key, fields, true)
    }
}

// ---------------------------------------------------------------------------
// RecordingTransport
// ---------------------------------------------------------------------------

pub struct RecordingTransport {
    sent:  Mutex<Vec<(String, PushPayload)>>,
    fail:  bool,
    delay: Option<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport { sent: Mutex::new(Vec::new()), fail: false, delay: None })
    }

    pub fn failing() -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport { sent: Mutex::new(Vec::new()), fail: true, delay: None })
    }

    /// Each send completes only after `delay`.
    pub fn slow(delay: Duration) -> Arc<RecordingTransport> {
        Arc::new(RecordingTransport { sent: Mutex::new(Vec::new()), fail: false, delay: Some(delay) })
    }

    pub fn sent(&self) -> Vec<(String, PushPayload)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, p)| p.notification.body).collect()
    }
}

#[async_trait]
impl PushTransport for RecordingTransport {
    async fn send(&self, address: &str, payload: &PushPayload) -> Result<(), TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push((address.to_owned(), payload.clone()));
        if self.fail {
            return Err(TransportError::Http("connection refused".to_owned()));
        }
        Ok(())
    }
}
