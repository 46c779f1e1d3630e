use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::data::path::compare_json;
use crate::{FieldPath, Key, Record};

/// Total order over two records of the same store.
pub type Comparer<R> = Arc<dyn Fn(&R, &R) -> Ordering + Send + Sync>;

/// Client-side inclusion test that cannot be pushed into the store.
pub type Predicate<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// Maps a record to its identity key within its store.
pub type KeyExtractor<R> = Arc<dyn Fn(&R) -> Option<Key> + Send + Sync>;

/// Treats every record as equal, so collections fall back to key order.
pub fn by_key<R: 'static>() -> Comparer<R> {
    Arc::new(|_: &R, _: &R| Ordering::Equal)
}

/// Orders records by the value at `path`. Records missing the field sort first.
pub fn by_path<R: Record>(path: impl Into<FieldPath>) -> Comparer<R> {
    let path = path.into();
    Arc::new(move |a: &R, b: &R| match (a.lookup(&path), b.lookup(&path)) {
        (Some(a), Some(b)) => compare_json(&a, &b),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    })
}

pub fn descending<R: 'static>(compare: Comparer<R>) -> Comparer<R> {
    Arc::new(move |a: &R, b: &R| compare(b, a))
}

/// Equality condition on a dotted field path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexFilter {
    pub path: FieldPath,
    pub value: Key,
}

impl IndexFilter {
    pub fn new(path: impl Into<FieldPath>, value: impl Into<Key>) -> Self {
        IndexFilter {
            path: path.into(),
            value: value.into(),
        }
    }

    /// A record whose path does not resolve simply does not match.
    pub fn matches<R: Record>(&self, record: &R) -> bool {
        record
            .lookup(&self.path)
            .map_or(false, |value| self.value.matches_json(&value))
    }
}
