//! A file-system-backed event store implementing Dynamic Consistency
//! Boundaries (DCB): the log, the cross-process lock, the tag/event-type
//! indices, the query planner, and the public `EventStore` facade, plus
//! configuration and validation.
//!
//! The file system *is* the database: there is no embedded database engine
//! underneath this crate, only plain files written with the durable
//! temp-write-fsync-rename discipline used throughout.

#![warn(missing_docs)]

pub mod eventfile;
pub mod index;
pub mod ledger;
pub mod lock;
pub mod options;
pub mod planner;
pub mod serializer;
pub mod store;

pub use index::write_file_durably;
pub use ledger::Ledger;
pub use lock::{CrossProcessLock, LockGuard};
pub use options::{FlushPolicy, StoreOptions};
pub use store::FsEventStore;
