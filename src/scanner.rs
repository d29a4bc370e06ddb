/// Entity scanner — one pass over a collection, decoding records lazily.
///
/// The store snapshot is taken up front (so a store outage fails the whole
/// scan), but each document is decoded only when the iterator reaches it.
/// Documents that do not decode into the requested record type are logged
/// and skipped; one user's bad data never ends the scan for everyone else.
use crate::{
    model::{decode, Collection, Document},
    store::{DocumentStore, StoreError},
};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

pub struct Scan<R> {
    collection: Collection,
    docs:       std::vec::IntoIter<(String, Document)>,
    _record:    PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned> Iterator for Scan<R> {
    type Item = (String, R);

    fn next(&mut self) -> Option<Self::Item> {
        for (key, doc) in self.docs.by_ref() {
            match decode::<R>(&doc) {
                Ok(record) => return Some((key, record)),
                Err(e) => tracing::warn!("Skipping malformed {}/{}: {}", self.collection, key, e),
            }
        }
        None
    }
}

pub async fn scan<R: DeserializeOwned>(
    store:      &dyn DocumentStore,
    collection: Collection,
) -> Result<Scan<R>, StoreError> {
    let docs = store.scan(collection).await?;
    tracing::debug!("Scanning {} document(s) in {}", docs.len(), collection);
    Ok(Scan { collection, docs: docs.into_iter(), _record: PhantomData })
}
