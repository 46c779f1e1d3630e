use std::cmp::Ordering;
use std::sync::Arc;

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::data::search::{find_position, insert_position};
use crate::{Comparer, Error, Key, KeyExtractor, Record, Result};

/// Immutable view of an ordered collection handed to consumers.
#[derive(Debug, Clone)]
pub struct CollectionData<R> {
    pub ids: Vec<Key>,
    pub index: FxHashMap<Key, R>,
}

impl<R> CollectionData<R> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<&R> {
        self.index.get(key)
    }

    /// Records in collection order.
    pub fn records(&self) -> impl Iterator<Item = &R> + '_ {
        self.ids.iter().filter_map(|id| self.index.get(id))
    }
}

impl<R> Default for CollectionData<R> {
    fn default() -> Self {
        CollectionData {
            ids: Vec::new(),
            index: FxHashMap::default(),
        }
    }
}

/// Sorted, deduplicated set of records keyed by identity.
///
/// `ids` is kept sorted by the comparer with the key as tie-break, so two
/// distinct records never compare equal and the order never depends on the
/// order records arrived in.
pub struct OrderedCollection<R> {
    key_of: KeyExtractor<R>,
    compare: Comparer<R>,
    ids: Vec<Key>,
    index: FxHashMap<Key, R>,
    cached: Option<Arc<CollectionData<R>>>,
}

impl<R: Record> OrderedCollection<R> {
    pub fn new(key_of: KeyExtractor<R>, compare: Comparer<R>) -> Self {
        OrderedCollection {
            key_of,
            compare,
            ids: Vec::new(),
            index: FxHashMap::default(),
            cached: None,
        }
    }

    pub fn with_records(
        key_of: KeyExtractor<R>,
        compare: Comparer<R>,
        records: impl IntoIterator<Item = R>,
    ) -> Result<Self> {
        let mut collection = Self::new(key_of, compare);
        collection.reset(records)?;
        Ok(collection)
    }

    pub fn key_of(&self, record: &R) -> Result<Key> {
        (self.key_of)(record).ok_or(Error::MissingKey)
    }

    fn order(&self, a: (&Key, &R), b: (&Key, &R)) -> Ordering {
        (self.compare)(a.1, b.1).then_with(|| a.0.cmp(b.0))
    }

    fn resolve(&self, key: &Key) -> Result<&R> {
        self.index
            .get(key)
            .ok_or_else(|| Error::PositionNotFound(key.clone()))
    }

    fn position_of(&self, key: &Key, record: &R) -> Result<usize> {
        find_position(&self.ids, |id| Ok(self.order((id, self.resolve(id)?), (key, record))))?
            .ok_or_else(|| Error::PositionNotFound(key.clone()))
    }

    /// Replace the entire contents. Later records win over earlier ones with
    /// the same key.
    pub fn reset(&mut self, records: impl IntoIterator<Item = R>) -> Result<()> {
        let mut index = FxHashMap::default();
        for record in records {
            index.insert(self.key_of(&record)?, record);
        }

        self.ids = index
            .iter()
            .sorted_by(|a, b| self.order(*a, *b))
            .map(|(key, _)| key.clone())
            .collect();
        self.index = index;
        self.cached = None;
        Ok(())
    }

    /// Insert a record, or move it to its new position when the key is
    /// already tracked.
    pub fn add(&mut self, record: R) -> Result<()> {
        let key = self.key_of(&record)?;

        if let Some(previous) = self.index.get(&key) {
            let position = self.position_of(&key, previous)?;
            self.ids.remove(position);
        }

        let position = insert_position(&self.ids, |id| {
            Ok(self.order((id, self.resolve(id)?), (&key, &record)))
        })?;

        self.ids.insert(position, key.clone());
        self.index.insert(key, record);
        self.cached = None;
        Ok(())
    }

    /// Remove a record by key. Returns `false`, leaving the cached snapshot
    /// intact, when the key is not tracked.
    pub fn remove(&mut self, key: &Key) -> Result<bool> {
        let Some(record) = self.index.get(key) else {
            return Ok(false);
        };

        let position = self.position_of(key, record)?;
        self.ids.remove(position);
        self.index.remove(key);
        self.cached = None;
        Ok(true)
    }

    /// Drop everything. Returns whether anything was tracked.
    pub fn clear(&mut self) -> bool {
        if self.ids.is_empty() {
            return false;
        }

        self.ids.clear();
        self.index.clear();
        self.cached = None;
        true
    }

    pub fn has(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// The current contents. Repeated calls return the same `Arc` until the
    /// collection is mutated.
    pub fn to_data(&mut self) -> Arc<CollectionData<R>> {
        if let Some(cached) = &self.cached {
            return cached.clone();
        }

        let data = Arc::new(CollectionData {
            ids: self.ids.clone(),
            index: self.index.clone(),
        });
        self.cached = Some(data.clone());
        data
    }
}

impl<R> std::fmt::Debug for OrderedCollection<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderedCollection")
            .field("ids", &self.ids)
            .field("cached", &self.cached.is_some())
            .finish()
    }
}
