use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{by_key, by_path, descending, Comparer, FieldPath, IndexFilter, Predicate, Record};

/// Which records of a store a slice or counter covers, and in what order.
#[derive(Clone)]
pub struct ViewOptions<R> {
    pub store: String,
    pub index: Option<IndexFilter>,
    pub filter: Option<Predicate<R>>,
    pub compare: Option<Comparer<R>>,
}

impl<R: Record> ViewOptions<R> {
    pub fn new(store: impl Into<String>) -> Self {
        ViewOptions {
            store: store.into(),
            index: None,
            filter: None,
            compare: None,
        }
    }

    pub fn index(mut self, index: IndexFilter) -> Self {
        self.index = Some(index);
        self
    }

    pub fn filter(mut self, filter: impl Fn(&R) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn compare(mut self, compare: Comparer<R>) -> Self {
        self.compare = Some(compare);
        self
    }

    pub fn is_in_index(&self, record: &R) -> bool {
        self.index.as_ref().map_or(true, |index| index.matches(record))
    }

    pub fn passes_filter(&self, record: &R) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(record))
    }

    pub fn includes(&self, record: &R) -> bool {
        self.is_in_index(record) && self.passes_filter(record)
    }

    /// The comparer, or key order when none was given.
    pub fn comparer(&self) -> Comparer<R> {
        self.compare.clone().unwrap_or_else(by_key)
    }
}

impl<R> std::fmt::Debug for ViewOptions<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewOptions")
            .field("store", &self.store)
            .field("index", &self.index)
            .field("filter", &self.filter.is_some())
            .field("compare", &self.compare.is_some())
            .finish()
    }
}

/// Serializable description of a view. Predicates have no serialized form
/// and are attached to the resulting `ViewOptions` in code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewConfig {
    pub store: String,
    #[serde(default)]
    pub index: Option<IndexFilter>,
    #[serde(default)]
    pub order_by: Option<FieldPath>,
    #[serde(default)]
    pub descending: bool,
}

impl ViewConfig {
    pub fn to_options<R: Record>(&self) -> ViewOptions<R> {
        let mut options = ViewOptions::new(self.store.clone());
        options.index = self.index.clone();
        options.compare = match (&self.order_by, self.descending) {
            (Some(path), false) => Some(by_path(path.clone())),
            (Some(path), true) => Some(descending(by_path(path.clone()))),
            (None, true) => Some(descending(by_key())),
            (None, false) => None,
        };
        options
    }
}
