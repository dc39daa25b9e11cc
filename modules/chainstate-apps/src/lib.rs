//! Reducers over the chainstate engine, one module per front-end app.
//!
//! Each app defines its state, its typed events, and a transition table.
//! Side data comes through a shared `Deps` resolver so the same reducers run
//! against live collaborators or in-memory ones.

pub mod adapters;
pub mod address_book;
pub mod dot_voting;
pub mod projects;

use std::sync::Arc;

use chainstate_engine::{BlobStore, ContractReader, Resolver};

pub use adapters::{IpfsBlobStore, SnapshotContract};

/// Side-data collaborators shared by every app's transitions.
pub type Deps = Resolver<Arc<dyn ContractReader>, Arc<dyn BlobStore>>;

pub fn deps(contract: Arc<dyn ContractReader>, store: Arc<dyn BlobStore>) -> Deps {
    Resolver::new(contract, store)
}
