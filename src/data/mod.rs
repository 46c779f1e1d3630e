mod collection;
mod connector;
mod counter;
mod entity;
mod error;
mod filter;
mod key;
mod notifications;
mod options;
mod path;
pub mod search;
mod slice;
mod store;
mod store_trait;
mod transport;

pub use collection::{CollectionData, OrderedCollection};
pub use connector::{Callback, ChangeConnector, Epoch, ExternalStore, Ready};
pub use counter::Counter;
pub use entity::{Entity, EntitySnapshot, EntityStatus};
pub use error::Error;
pub use filter::{by_key, by_path, descending, Comparer, IndexFilter, KeyExtractor, Predicate};
pub use key::Key;
pub use notifications::{
    decode_notification, encode_notification, Change, ChangeHub, ChangeListener,
    ChangeNotification, ChangeSource, ListenerToken, ResyncListener,
};
pub use options::{ViewConfig, ViewOptions};
pub use path::{compare_json, FieldPath, Record, PATH_DELIMITER};
pub use slice::Slice;
pub use store::{DatabaseSchema, MemoryDatabase, StoreSchema, Transaction};
pub use store_trait::{collect_matching, count_matching, RecordStream, StoreCursor, StoreEngine};
pub use transport::{BroadcastTransport, ChangeTransport};
