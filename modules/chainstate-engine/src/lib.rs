//! Event-sourced state cache.
//!
//! Folds an ordered stream of contract events into application state.
//! Transitions may suspend on side data (contract reads, content-addressed
//! fetches) while later events keep arriving; the driver validates every
//! change against the latest committed state so a resumed transition never
//! resurrects or duplicates an entity.
//!
//! Consumers define their domain as a `DomainEvent` enum, a `CacheState`,
//! and a `TransitionTable` of `Transition`s.

pub mod cache;
pub mod driver;
pub mod error;
pub mod memory;
pub mod resolver;
pub mod settings;
pub mod transition;
pub mod types;

pub use cache::{CacheChange, EntityCache};
pub use driver::{classify, CacheState, DriveReport, Driver, InFlight, Outcome, Settled, SYNC_SLOT};
pub use error::{ReduceError, ResolveError, RESOLUTION_ERROR};
pub use memory::{FetchGate, MemoryBlobStore, MemoryContract};
pub use resolver::{BlobStore, ContractCall, ContractReader, Resolver};
pub use settings::{NoSettings, SettingsLoader};
pub use transition::{decode_fields, Change, Changes, DomainEvent, Transition, TransitionTable};
pub use types::{
    Delivered, Entity, EntityKey, Pointer, RawEvent, Slot, SYNC_STATUS_SYNCED, SYNC_STATUS_SYNCING,
};

pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
