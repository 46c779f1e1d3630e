use thiserror::Error;

use crate::Key;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("Unknown store: {0}")]
    UnknownStore(String),

    #[error("Store {store} has no index on {path}")]
    UnknownIndex { store: String, path: String },

    #[error("Record has no value at its key path")]
    MissingKey,

    /// The binary search ran past its iteration bound. The comparer is not a
    /// total order or the id sequence is no longer sorted.
    #[error("Binary search exceeded its bound of {bound} iterations")]
    SearchDiverged { bound: usize },

    /// A key is present in the index but could not be located in the ordered ids.
    #[error("Key {0} is tracked but its position could not be found")]
    PositionNotFound(Key),

    #[error("Unhandled change event: {0}")]
    UnhandledChange(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
