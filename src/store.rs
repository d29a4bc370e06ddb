/// Document store — the `DocumentStore` seam plus its SQLite implementation.
///
/// Uses `rusqlite` with the `bundled` feature so SQLite is compiled in —
/// no system installation required. Each document is one JSON object stored
/// in the `documents` table under `(collection, key)`.
///
/// Writes run on a dedicated `std::thread` that owns the connection and
/// receives commands via a bounded sync channel; callers hold a cheap
/// `SqliteStore` handle that is Clone + Send + Sync. After every successful
/// write the writer thread publishes a `WriteEvent` (the write trigger), so
/// trigger handlers see writes in commit order.
///
/// Reads open their own short-lived read-only connection on `spawn_blocking`,
/// keeping the writer thread focused on writes only.
use crate::model::{Collection, Document};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

// ---------------------------------------------------------------------------
// Errors and events
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),

    #[error("document {collection}/{key} not found")]
    NotFound { collection: Collection, key: String },

    #[error("document {collection}/{key} is not a JSON object: {source}")]
    Corrupt {
        collection: Collection,
        key:        String,
        #[source]
        source:     serde_json::Error,
    },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// Published after every committed write to any collection.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteEvent {
    pub collection:     Collection,
    pub key:            String,
    /// Field names present in the write itself (not the whole document).
    pub written_fields: Vec<String>,
    /// The document as it reads after the write.
    pub snapshot:       Document,
}

impl WriteEvent {
    pub fn touched(&self, field: &str) -> bool {
        self.written_fields.iter().any(|f| f == field)
    }
}

pub type WriteEvents = mpsc::UnboundedReceiver<WriteEvent>;

// ---------------------------------------------------------------------------
// DocumentStore trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Every document in `collection`, unordered.
    async fn scan(&self, collection: Collection) -> Result<Vec<(String, Document)>, StoreError>;

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>, StoreError>;

    /// Merge `fields` into an existing document. Fails with `NotFound` if the
    /// document does not exist.
    async fn update(&self, collection: Collection, key: &str, fields: Document) -> Result<(), StoreError>;

    /// Merge `fields` into a document, creating it when missing.
    async fn upsert(&self, collection: Collection, key: &str, fields: Document) -> Result<(), StoreError>;
}

/// Apply a partial update on top of an existing document.
pub fn merge_fields(mut base: Document, fields: &Document) -> Document {
    for (name, value) in fields {
        base.insert(name.clone(), value.clone());
    }
    base
}

// ---------------------------------------------------------------------------
// Commands sent to the writer thread
// ---------------------------------------------------------------------------

enum StoreCommand {
    Write {
        reply:      oneshot::Sender<Result<(), StoreError>>,
        collection: Collection,
        key:        String,
        fields:     Document,
        create:     bool,
    },
    Shutdown,
}

// ---------------------------------------------------------------------------
// SqliteStore — cheap handle, Clone + Send + Sync
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SqliteStore {
    tx:      std::sync::mpsc::SyncSender<StoreCommand>,
    db_path: PathBuf,
}

impl SqliteStore {
    /// Initialise SQLite at `db_path`, apply the schema, and spawn the writer
    /// thread. Returns the handle plus the receiving end of the write trigger.
    pub fn open(db_path: &Path) -> Result<(SqliteStore, WriteEvents), StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create {:?}: {}", parent, e)))?;
        }

        let conn = Connection::open(db_path)?;
        apply_schema(&conn)?;

        let (tx, rx)              = std::sync::mpsc::sync_channel::<StoreCommand>(512);
        let (event_tx, event_rx)  = mpsc::unbounded_channel::<WriteEvent>();

        std::thread::spawn(move || store_writer_loop(rx, conn, event_tx));

        tracing::info!("SQLite document store opened at {:?}", db_path);
        Ok((SqliteStore { tx, db_path: db_path.to_path_buf() }, event_rx))
    }

    /// Stop the writer thread. Pending writes queued before this call still land.
    pub fn shutdown(&self) {
        let _ = self.tx.send(StoreCommand::Shutdown);
    }

    async fn write(
        &self,
        collection: Collection,
        key:        &str,
        fields:     Document,
        create:     bool,
    ) -> Result<(), StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let tx = self.tx.clone();
        let cmd = StoreCommand::Write { reply: reply_tx, collection, key: key.to_owned(), fields, create };
        // SyncSender::send blocks when the queue is full.
        tokio::task::spawn_blocking(move || tx.send(cmd))
            .await
            .map_err(|e| StoreError::Unavailable(format!("task error: {}", e)))?
            .map_err(|_| StoreError::Unavailable("writer channel closed".to_owned()))?;
        reply_rx
            .await
            .map_err(|_| StoreError::Unavailable("writer reply channel closed".to_owned()))?
    }

    async fn read<T, F>(&self, query: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
                .map_err(|e| StoreError::Unavailable(format!("DB open: {}", e)))?;
            query(&conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("task error: {}", e)))?
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn scan(&self, collection: Collection) -> Result<Vec<(String, Document)>, StoreError> {
        self.read(move |conn| {
            let mut stmt = conn.prepare("SELECT key, body FROM documents WHERE collection = ?1")?;
            let rows = stmt
                .query_map(params![collection.as_str()], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut docs = Vec::with_capacity(rows.len());
            for (key, body) in rows {
                match parse_body(collection, &key, &body) {
                    Ok(doc) => docs.push((key, doc)),
                    Err(e)  => tracing::warn!("Skipping unreadable document: {}", e),
                }
            }
            Ok(docs)
        })
        .await
    }

    async fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>, StoreError> {
        let key = key.to_owned();
        self.read(move |conn| {
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
                    params![collection.as_str(), key],
                    |row| row.get(0),
                )
                .optional()?;
            body.map(|b| parse_body(collection, &key, &b)).transpose()
        })
        .await
    }

    async fn update(&self, collection: Collection, key: &str, fields: Document) -> Result<(), StoreError> {
        self.write(collection, key, fields, false).await
    }

    async fn upsert(&self, collection: Collection, key: &str, fields: Document) -> Result<(), StoreError> {
        self.write(collection, key, fields, true).await
    }
}

fn parse_body(collection: Collection, key: &str, body: &str) -> Result<Document, StoreError> {
    serde_json::from_str::<Document>(body).map_err(|source| StoreError::Corrupt {
        collection,
        key: key.to_owned(),
        source,
    })
}

fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous  = NORMAL;

        CREATE TABLE IF NOT EXISTS documents (
            collection TEXT    NOT NULL,
            key        TEXT    NOT NULL,
            body       TEXT    NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (collection, key)
        );
    ")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Writer loop (runs on its own std::thread)
// ---------------------------------------------------------------------------

fn store_writer_loop(
    rx:       std::sync::mpsc::Receiver<StoreCommand>,
    conn:     Connection,
    event_tx: mpsc::UnboundedSender<WriteEvent>,
) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            StoreCommand::Write { reply, collection, key, fields, create } => {
                let result = apply_write(&conn, collection, &key, &fields, create);
                let result = result.map(|snapshot| {
                    // Receiver gone means nobody listens for triggers; the write still stands.
                    let _ = event_tx.send(WriteEvent {
                        collection,
                        key: key.clone(),
                        written_fields: fields.keys().cloned().collect(),
                        snapshot,
                    });
                });
                if let Err(e) = &result {
                    tracing::warn!("DB write {}/{} error: {}", collection, key, e);
                }
                let _ = reply.send(result);
            }

            StoreCommand::Shutdown => break,
        }
    }
    tracing::debug!("SQLite writer thread exiting");
}

fn apply_write(
    conn:       &Connection,
    collection: Collection,
    key:        &str,
    fields:     &Document,
    create:     bool,
) -> Result<Document, StoreError> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND key = ?2",
            params![collection.as_str(), key],
            |row| row.get(0),
        )
        .optional()?;

    let base = match existing {
        Some(body) => parse_body(collection, key, &body)?,
        None if create => Document::new(),
        None => {
            return Err(StoreError::NotFound { collection, key: key.to_owned() });
        }
    };

    let merged = merge_fields(base, fields);
    let body = serde_json::Value::Object(merged.clone()).to_string();
    conn.execute(
        "INSERT INTO documents (collection, key, body, updated_at) VALUES (?1, ?2, ?3, ?4) \
         ON CONFLICT(collection, key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
        params![collection.as_str(), key, body, chrono::Utc::now().timestamp_millis()],
    )?;
    Ok(merged)
}
