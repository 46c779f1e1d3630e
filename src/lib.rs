pub mod data;

#[cfg(test)]
mod test;

pub use data::{
    by_key, by_path, compare_json, decode_notification, descending, encode_notification,
    BroadcastTransport, Callback, Change, ChangeConnector, ChangeHub, ChangeListener,
    ChangeNotification, ChangeSource, ChangeTransport, CollectionData, Comparer, Counter,
    DatabaseSchema, Entity, EntitySnapshot, EntityStatus, Epoch, Error, ExternalStore, FieldPath,
    IndexFilter, Key, KeyExtractor, ListenerToken, MemoryDatabase, OrderedCollection, Predicate,
    Ready, Record, RecordStream, ResyncListener, Slice, StoreCursor, StoreEngine, StoreSchema,
    Transaction, ViewConfig, ViewOptions, PATH_DELIMITER,
};

pub type Result<T> = std::result::Result<T, Error>;

/// Create an IndexFilter with minimal syntax
///
/// # Example
///
/// ```
/// let filter = qslice_rs::sindex!("lastName", "A");
/// assert_eq!(filter.value, qslice_rs::Key::from("A"));
/// ```
#[macro_export]
macro_rules! sindex {
    ($path:expr, $value:expr) => {
        $crate::IndexFilter::new($path, $value)
    };
}

/// Create a Key from an integer or string
#[macro_export]
macro_rules! skey {
    ($value:expr) => {
        $crate::Key::from($value)
    };
}
