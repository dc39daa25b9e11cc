//! Address book: named entries keyed by address, payloads on IPFS.
//!
//! The contract stores one CID per address (`getEntry`). An empty CID means
//! the entry was removed in a later block than the event being folded.

use async_trait::async_trait;
use chainstate_engine::{
    decode_fields, CacheChange, CacheState, Changes, DomainEvent, Driver, EntityCache, EntityKey,
    RawEvent, ReduceError, ResolveError, Transition, TransitionTable,
};
use serde::{Deserialize, Serialize};

use crate::Deps;

pub const ENTRIES: &str = "entries";
const GET_ENTRY: &str = "getEntry";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryData {
    pub name: String,
    #[serde(rename = "entryType")]
    pub entry_type: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressBookState {
    pub is_syncing: bool,
    pub entries: EntityCache<EntryData>,
}

impl CacheState for AddressBookState {
    fn is_syncing(&self) -> bool {
        self.is_syncing
    }

    fn set_syncing(&mut self, syncing: bool) {
        self.is_syncing = syncing;
    }
}

fn entries(state: &mut AddressBookState) -> &mut EntityCache<EntryData> {
    &mut state.entries
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressBookKind {
    EntryAdded,
    EntryRemoved,
    EntryUpdated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AddressBookEvent {
    EntryAdded { addr: EntityKey },
    EntryRemoved { addr: EntityKey },
    EntryUpdated { addr: EntityKey },
}

impl AddressBookEvent {
    pub fn addr(&self) -> &EntityKey {
        match self {
            AddressBookEvent::EntryAdded { addr }
            | AddressBookEvent::EntryRemoved { addr }
            | AddressBookEvent::EntryUpdated { addr } => addr,
        }
    }
}

#[derive(Deserialize)]
struct AddrFields {
    addr: String,
}

impl DomainEvent for AddressBookEvent {
    type Kind = AddressBookKind;

    fn kind(&self) -> AddressBookKind {
        match self {
            AddressBookEvent::EntryAdded { .. } => AddressBookKind::EntryAdded,
            AddressBookEvent::EntryRemoved { .. } => AddressBookKind::EntryRemoved,
            AddressBookEvent::EntryUpdated { .. } => AddressBookKind::EntryUpdated,
        }
    }

    fn decode(raw: &RawEvent) -> Result<Option<Self>, ReduceError> {
        let build: fn(EntityKey) -> Self = match raw.event.as_str() {
            "EntryAdded" => |addr| AddressBookEvent::EntryAdded { addr },
            "EntryRemoved" => |addr| AddressBookEvent::EntryRemoved { addr },
            "EntryUpdated" => |addr| AddressBookEvent::EntryUpdated { addr },
            _ => return Ok(None),
        };
        let fields: AddrFields = decode_fields(raw)?;
        Ok(Some(build(EntityKey::new(fields.addr))))
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

async fn load_entry(deps: &Deps, addr: EntityKey) -> Result<Option<EntryData>, ResolveError> {
    deps.resolve_keyed(GET_ENTRY, &addr).await
}

struct AddEntry;

#[async_trait]
impl Transition<AddressBookState, AddressBookEvent, Deps> for AddEntry {
    async fn prepare(
        &self,
        snapshot: &AddressBookState,
        event: &AddressBookEvent,
        deps: &Deps,
    ) -> Result<Changes<AddressBookState>, ReduceError> {
        let change = snapshot
            .entries
            .plan_upsert(event.addr(), |addr| load_entry(deps, addr))
            .await?;
        Ok(Changes::cache(ENTRIES, change, entries))
    }
}

struct RemoveEntry;

#[async_trait]
impl Transition<AddressBookState, AddressBookEvent, Deps> for RemoveEntry {
    async fn prepare(
        &self,
        _snapshot: &AddressBookState,
        event: &AddressBookEvent,
        _deps: &Deps,
    ) -> Result<Changes<AddressBookState>, ReduceError> {
        let change = CacheChange::Remove(event.addr().clone());
        Ok(Changes::cache(ENTRIES, change, entries))
    }
}

struct UpdateEntry;

#[async_trait]
impl Transition<AddressBookState, AddressBookEvent, Deps> for UpdateEntry {
    async fn prepare(
        &self,
        snapshot: &AddressBookState,
        event: &AddressBookEvent,
        deps: &Deps,
    ) -> Result<Changes<AddressBookState>, ReduceError> {
        let change = snapshot
            .entries
            .plan_update(event.addr(), |addr| load_entry(deps, addr))
            .await?;
        Ok(Changes::cache(ENTRIES, change, entries))
    }
}

pub fn transitions() -> TransitionTable<AddressBookState, AddressBookEvent, Deps> {
    TransitionTable::new()
        .on(AddressBookKind::EntryAdded, AddEntry)
        .on(AddressBookKind::EntryRemoved, RemoveEntry)
        .on(AddressBookKind::EntryUpdated, UpdateEntry)
}

pub type AddressBookDriver = Driver<AddressBookState, AddressBookEvent, Deps>;

pub fn driver(deps: Deps) -> AddressBookDriver {
    Driver::new(transitions(), deps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_events() {
        let raw = RawEvent::new("EntryRemoved").with_value("addr", "0xAB");
        assert_eq!(
            AddressBookEvent::decode(&raw).unwrap(),
            Some(AddressBookEvent::EntryRemoved {
                addr: EntityKey::new("0xab")
            })
        );
    }

    #[test]
    fn unknown_names_decode_to_none() {
        let raw = RawEvent::new("ScriptResult");
        assert_eq!(AddressBookEvent::decode(&raw).unwrap(), None);
    }

    #[test]
    fn every_kind_has_a_transition() {
        let table = transitions();
        for kind in [
            AddressBookKind::EntryAdded,
            AddressBookKind::EntryRemoved,
            AddressBookKind::EntryUpdated,
        ] {
            assert!(table.handles(kind));
        }
    }

    #[test]
    fn state_serializes_for_the_frontend() {
        let state = AddressBookState::default();
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value, serde_json::json!({ "isSyncing": false, "entries": [] }));
    }
}
