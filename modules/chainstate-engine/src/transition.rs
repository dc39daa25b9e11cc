//! Typed event dispatch: event kinds → transitions → slot-scoped changes.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::cache::{CacheChange, EntityCache};
use crate::error::ReduceError;
use crate::types::{RawEvent, Slot};

/// A closed set of strongly typed events for one app.
pub trait DomainEvent: Clone + Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;

    /// Decode a raw feed event. Unrecognised names decode to `Ok(None)`;
    /// a recognised name with malformed fields is an error.
    fn decode(raw: &RawEvent) -> Result<Option<Self>, ReduceError>;
}

/// Deserialize `returnValues` into a typed field struct.
pub fn decode_fields<T: DeserializeOwned>(raw: &RawEvent) -> Result<T, ReduceError> {
    serde_json::from_value(serde_json::Value::Object(raw.return_values.clone()))
        .map_err(|e| ReduceError::decode(&raw.event, e))
}

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

/// One slot-scoped write, applied to the latest committed state.
///
/// A claim writes nothing. It only marks the slot as written by its event,
/// so older in-flight events can no longer write it.
pub struct Change<S> {
    slot: Slot,
    apply: Option<Box<dyn FnOnce(&mut S) + Send>>,
}

impl<S> Change<S> {
    pub fn new(slot: Slot, apply: impl FnOnce(&mut S) + Send + 'static) -> Self {
        Self {
            slot,
            apply: Some(Box::new(apply)),
        }
    }

    pub fn claim(slot: Slot) -> Self {
        Self { slot, apply: None }
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    pub fn is_claim(&self) -> bool {
        self.apply.is_none()
    }

    /// Split into the slot and the mutation, if any.
    pub(crate) fn into_parts(self) -> (Slot, Option<Box<dyn FnOnce(&mut S) + Send>>) {
        (self.slot, self.apply)
    }
}

impl<S> fmt::Debug for Change<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("slot", &self.slot)
            .field("claim", &self.is_claim())
            .finish()
    }
}

/// The output of a transition's prepare phase.
#[derive(Debug)]
pub struct Changes<S>(Vec<Change<S>>);

impl<S> Default for Changes<S> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<S: 'static> Changes<S> {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn one(slot: Slot, apply: impl FnOnce(&mut S) + Send + 'static) -> Self {
        Self(vec![Change::new(slot, apply)])
    }

    /// Lift a planned cache mutation into a change on the collection
    /// returned by `cache`. `Unchanged` produces no change and `Keep`
    /// produces a claim on the key's slot.
    pub fn cache<P: Send + 'static>(
        collection: &'static str,
        change: CacheChange<P>,
        cache: fn(&mut S) -> &mut EntityCache<P>,
    ) -> Self {
        match change {
            CacheChange::Unchanged => Self::none(),
            CacheChange::Keep(key) => Self(vec![Change::claim(Slot::entity(collection, key))]),
            change => {
                let Some(key) = change.key().cloned() else {
                    return Self::none();
                };
                Self::one(Slot::entity(collection, key), move |state| {
                    change.apply(cache(state));
                })
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S> IntoIterator for Changes<S> {
    type Item = Change<S>;
    type IntoIter = std::vec::IntoIter<Change<S>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// Computes the changes one event makes.
///
/// `prepare` sees the snapshot captured when the event was dispatched and
/// may await side data. Its changes are applied to whatever state is
/// current when it finishes, so they must be phrased as re-checking
/// mutations (insert-if-absent, remove-by-key), never as whole-state
/// replacements.
#[async_trait]
pub trait Transition<S, E, D>: Send + Sync {
    async fn prepare(&self, snapshot: &S, event: &E, deps: &D) -> Result<Changes<S>, ReduceError>;
}

/// Event kind → transition. Kinds without an entry are no-ops.
pub struct TransitionTable<S, E: DomainEvent, D> {
    transitions: HashMap<E::Kind, Box<dyn Transition<S, E, D>>>,
}

impl<S, E: DomainEvent, D> Default for TransitionTable<S, E, D> {
    fn default() -> Self {
        Self {
            transitions: HashMap::new(),
        }
    }
}

impl<S, E: DomainEvent, D> TransitionTable<S, E, D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, kind: E::Kind, transition: impl Transition<S, E, D> + 'static) -> Self {
        self.transitions.insert(kind, Box::new(transition));
        self
    }

    pub fn get(&self, kind: E::Kind) -> Option<&dyn Transition<S, E, D>> {
        self.transitions.get(&kind).map(|t| t.as_ref())
    }

    pub fn handles(&self, kind: E::Kind) -> bool {
        self.transitions.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Entity, EntityKey};

    #[derive(Debug, Default)]
    struct Counter {
        hits: u32,
        items: EntityCache<u32>,
    }

    #[derive(Debug, Clone)]
    enum Ping {
        Hit,
        Miss,
    }

    impl DomainEvent for Ping {
        type Kind = &'static str;

        fn kind(&self) -> Self::Kind {
            match self {
                Ping::Hit => "Hit",
                Ping::Miss => "Miss",
            }
        }

        fn decode(raw: &RawEvent) -> Result<Option<Self>, ReduceError> {
            Ok(match raw.event.as_str() {
                "Hit" => Some(Ping::Hit),
                "Miss" => Some(Ping::Miss),
                _ => None,
            })
        }
    }

    struct CountHits;

    #[async_trait]
    impl Transition<Counter, Ping, ()> for CountHits {
        async fn prepare(&self, _: &Counter, _: &Ping, _: &()) -> Result<Changes<Counter>, ReduceError> {
            Ok(Changes::one(Slot::Field("hits"), |s: &mut Counter| s.hits += 1))
        }
    }

    #[tokio::test]
    async fn registered_kind_resolves_to_transition() {
        let table: TransitionTable<Counter, Ping, ()> = TransitionTable::new().on("Hit", CountHits);
        assert!(table.handles("Hit"));
        assert!(!table.handles("Miss"));

        let transition = table.get(Ping::Hit.kind()).unwrap();
        let mut state = Counter::default();
        for change in transition.prepare(&state, &Ping::Hit, &()).await.unwrap() {
            if let (_, Some(apply)) = change.into_parts() {
                apply(&mut state);
            }
        }
        assert_eq!(state.hits, 1);
    }

    #[test]
    fn unchanged_cache_plan_yields_no_change() {
        let changes: Changes<Counter> =
            Changes::cache("items", CacheChange::Unchanged, |s: &mut Counter| &mut s.items);
        assert!(changes.is_empty());
    }

    #[test]
    fn cache_change_is_scoped_to_its_key() {
        let changes: Changes<Counter> = Changes::cache(
            "items",
            CacheChange::Insert(Entity::new(EntityKey::new("7"), 7)),
            |s: &mut Counter| &mut s.items,
        );
        let change = changes.into_iter().next().unwrap();
        assert_eq!(change.slot(), &Slot::entity("items", EntityKey::new("7")));
        assert!(!change.is_claim());
    }

    #[test]
    fn kept_cache_plan_claims_the_slot() {
        let changes: Changes<Counter> = Changes::cache(
            "items",
            CacheChange::Keep(EntityKey::new("7")),
            |s: &mut Counter| &mut s.items,
        );
        let change = changes.into_iter().next().unwrap();
        assert!(change.is_claim());
        assert_eq!(change.slot(), &Slot::entity("items", EntityKey::new("7")));
    }

    #[test]
    fn malformed_fields_are_decode_errors() {
        #[derive(Debug, serde::Deserialize)]
        struct Fields {
            #[allow(dead_code)]
            addr: String,
        }
        let raw = RawEvent::new("EntryAdded").with_value("addr", 5);
        let err = decode_fields::<Fields>(&raw).unwrap_err();
        assert!(matches!(err, ReduceError::Decode { ref event, .. } if event == "EntryAdded"));
    }
}
