use async_trait::async_trait;
use futures_util::future;
use futures_util::stream::{BoxStream, TryStreamExt};

use crate::{ChangeSource, IndexFilter, Key, KeyExtractor, Predicate, Record, Result};

/// One step of a cursor walk over a store or index.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreCursor<R> {
    pub key: Key,
    pub record: R,
}

/// Lazy, finite, single-pass walk over matching records.
pub type RecordStream<R> = BoxStream<'static, Result<StoreCursor<R>>>;

/// What the live views need from a transactional object store.
///
/// Every read is asynchronous. Committed writes are announced through the
/// `ChangeSource` supertrait, one batch per store per transaction.
#[async_trait]
pub trait StoreEngine<R: Record>: ChangeSource<R> {
    async fn get_all(&self, store: &str) -> Result<Vec<R>>;

    async fn get_index_all(&self, store: &str, filter: &IndexFilter) -> Result<Vec<R>>;

    fn iterate(&self, store: &str) -> RecordStream<R>;

    fn iterate_index(&self, store: &str, filter: &IndexFilter) -> RecordStream<R>;

    async fn get_count(&self, store: &str) -> Result<usize>;

    async fn get_index_count(&self, store: &str, filter: &IndexFilter) -> Result<usize>;

    async fn get(&self, store: &str, key: &Key) -> Result<Option<R>>;

    fn key_extractor(&self, store: &str) -> Result<KeyExtractor<R>>;
}

/// Drain a cursor walk, keeping the records that pass `predicate`.
pub async fn collect_matching<R: Record>(stream: RecordStream<R>, predicate: &Predicate<R>) -> Result<Vec<R>> {
    stream
        .try_filter(|cursor| future::ready(predicate(&cursor.record)))
        .map_ok(|cursor| cursor.record)
        .try_collect()
        .await
}

/// Drain a cursor walk, counting the records that pass `predicate`.
pub async fn count_matching<R: Record>(stream: RecordStream<R>, predicate: &Predicate<R>) -> Result<usize> {
    stream
        .try_fold(0, |count, cursor| {
            future::ready(Ok(if predicate(&cursor.record) { count + 1 } else { count }))
        })
        .await
}
