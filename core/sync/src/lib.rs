//! Rox Sync Engine
//!
//! Keeps a live, identity-stable collection of records in step with a
//! snapshot source, including:
//! - Keyed snapshot diffing into add/update/delete changes
//! - Reconciliation that respects fields edited locally since the last
//!   snapshot
//! - Filtered, sorted views reordered in place with precise notifications
//! - Single-flight refresh cycles with retry, timeout and cancellation
//! - Manual and periodic refresh scheduling

pub mod collection;
pub mod diff;
pub mod digest;
pub mod engine;
pub mod mapped;
pub mod observable;
pub mod query;
pub mod reorder;
pub mod retry;
pub mod scheduler;
pub mod schema;
pub mod source;
pub mod state;

#[cfg(test)]
mod test_support;

// Re-export main types
pub use collection::{LiveCollection, RecordId};
pub use diff::{compare, Change, ChangeKind, FieldDiff};
pub use digest::{digest, DigestReport};
pub use engine::{SyncConfig, SyncHandle, SyncedCollection, SyncedCollectionBuilder};
pub use mapped::{MappedCollection, MappedView};
pub use observable::{ChangeCallback, CollectionChange, ObservableVec, RecordingSink, SubscriptionId};
pub use query::{Combinator, FilterChain, SortChain, SortDirection};
pub use reorder::{reorder, ReorderStats};
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{RefreshMode, RefreshScheduler, RefreshSchedulerHandle};
pub use schema::{
    factory_fn, seeded_factory_fn, DefaultFactory, FieldKind, FieldWriteRejected, MapAccessor,
    MapRecord, RecordAccessor, RecordFactory, Schema,
};
pub use source::{source_fn, FnSource, MemorySource, SnapshotSource};
pub use state::{CycleState, RefreshResult, SyncStatus};
