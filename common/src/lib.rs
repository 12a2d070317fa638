// Pharos common library - main library exports

pub mod alert;
pub mod calculations;
pub mod configuration;
pub mod crypto;
pub mod store;
pub mod types;

// Flattened re-exports
pub use self::store::{Datastore, InsertOutcome, MemoryStore, RecordApiStore};
pub use self::types::*;
