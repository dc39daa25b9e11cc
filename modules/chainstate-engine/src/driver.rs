//! The reducer driver.
//!
//! Dispatch → (settings) → prepare → commit. Dispatch is synchronous and
//! fixes an event's position in delivery order. Prepare may suspend on side
//! data, so several events can be in flight at once. Commit applies each
//! change to the latest state unless a later event already wrote the same
//! slot, in which case the stale change is dropped.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::ReduceError;
use crate::lock;
use crate::settings::{NoSettings, SettingsLoader};
use crate::transition::{Changes, DomainEvent, TransitionTable};
use crate::types::{Delivered, RawEvent, Slot, SYNC_STATUS_SYNCED, SYNC_STATUS_SYNCING};

/// Slot written by the sync sentinels.
pub const SYNC_SLOT: Slot = Slot::Field("is_syncing");

/// Application state folded by the driver.
pub trait CacheState: Clone + Default + Send + Sync + 'static {
    fn is_syncing(&self) -> bool;

    fn set_syncing(&mut self, syncing: bool);
}

/// Classify a raw event into a sentinel, a typed event, or unknown.
pub fn classify<E: DomainEvent>(raw: &RawEvent) -> Result<Delivered<E>, ReduceError> {
    Ok(match raw.event.as_str() {
        SYNC_STATUS_SYNCING => Delivered::SyncStatus(true),
        SYNC_STATUS_SYNCED => Delivered::SyncStatus(false),
        _ => match E::decode(raw)? {
            Some(event) => Delivered::Domain(event),
            None => Delivered::Unknown(raw.event.clone()),
        },
    })
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct Driver<S, E: DomainEvent, D, L = NoSettings> {
    shared: Arc<Shared<S, E, D, L>>,
}

impl<S, E: DomainEvent, D, L> Clone for Driver<S, E, D, L> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<S, E: DomainEvent, D, L> {
    table: TransitionTable<S, E, D>,
    deps: D,
    settings: L,
    committed: Mutex<Committed<S>>,
    snapshots: watch::Sender<Arc<S>>,
}

struct Committed<S> {
    state: Arc<S>,
    next_ticket: u64,
    /// Ticket of the last committed write per slot.
    last_write: HashMap<Slot, u64>,
}

impl<S, E, D> Driver<S, E, D, NoSettings>
where
    S: CacheState,
    E: DomainEvent,
    D: Send + Sync + 'static,
{
    pub fn new(table: TransitionTable<S, E, D>, deps: D) -> Self {
        Self::with_settings(table, deps, NoSettings)
    }
}

impl<S, E, D, L> Driver<S, E, D, L>
where
    S: CacheState,
    E: DomainEvent,
    D: Send + Sync + 'static,
    L: SettingsLoader<S, D> + 'static,
{
    pub fn with_settings(table: TransitionTable<S, E, D>, deps: D, settings: L) -> Self {
        Self::from_state(table, deps, settings, S::default())
    }

    /// Start from a previously folded state instead of the default.
    pub fn from_state(table: TransitionTable<S, E, D>, deps: D, settings: L, initial: S) -> Self {
        let state = Arc::new(initial);
        let (snapshots, _) = watch::channel(Arc::clone(&state));
        Self {
            shared: Arc::new(Shared {
                table,
                deps,
                settings,
                committed: Mutex::new(Committed {
                    state,
                    next_ticket: 0,
                    last_write: HashMap::new(),
                }),
                snapshots,
            }),
        }
    }

    /// The latest committed snapshot.
    pub fn snapshot(&self) -> Arc<S> {
        Arc::clone(&lock(&self.shared.committed).state)
    }

    /// Receive every committed snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<S>> {
        self.shared.snapshots.subscribe()
    }

    /// Take the next position in delivery order and capture the snapshot
    /// the event's transition will read.
    pub fn dispatch(&self, raw: RawEvent) -> InFlight<S, E, D, L> {
        let mut committed = lock(&self.shared.committed);
        committed.next_ticket += 1;
        InFlight {
            driver: self.clone(),
            ticket: committed.next_ticket,
            snapshot: Arc::clone(&committed.state),
            raw,
        }
    }

    /// Fold one event and return the snapshot it produced.
    pub async fn reduce(&self, raw: RawEvent) -> Result<Arc<S>, ReduceError> {
        self.dispatch(raw).settle().await.map(|settled| settled.snapshot)
    }

    /// Consume a feed, keeping up to `concurrency` events in flight. Failed
    /// events are logged and skipped; the feed keeps going.
    pub async fn drive<St>(&self, events: St, concurrency: usize) -> DriveReport
    where
        St: Stream<Item = RawEvent>,
    {
        let counters = DriveCounters::default();
        let tally = &counters;
        events
            .for_each_concurrent(concurrency.max(1), move |raw| {
                let in_flight = self.dispatch(raw);
                async move {
                    let event = in_flight.event_name().to_string();
                    match in_flight.settle().await {
                        Ok(settled) => tally.record(&settled.outcome),
                        Err(err) => {
                            tally.failed.fetch_add(1, Ordering::Relaxed);
                            match &err {
                                ReduceError::Resolution(resolution) => warn!(
                                    event = %event,
                                    kind = resolution.kind(),
                                    error = %err,
                                    "Transition failed, snapshot unchanged"
                                ),
                                _ => warn!(event = %event, error = %err, "Transition failed, snapshot unchanged"),
                            }
                        }
                    }
                }
            })
            .await;
        counters.into_report()
    }

    fn commit(&self, ticket: u64, fragment: Option<L::Fragment>, changes: Changes<S>) -> Settled<S> {
        let shared = &self.shared;
        let mut committed = lock(&shared.committed);
        let mut next: Option<S> = None;

        if let Some(fragment) = fragment {
            if !shared.settings.has_loaded(&committed.state) {
                let state = next.get_or_insert_with(|| (*committed.state).clone());
                shared.settings.merge(state, fragment);
            }
        }

        let mut applied = 0;
        let mut discarded = 0;
        for change in changes {
            let (slot, apply) = change.into_parts();
            if let Some(&later) = committed.last_write.get(&slot) {
                if later > ticket {
                    debug!(%slot, ticket, superseded_by = later, "Discarding stale change");
                    discarded += 1;
                    continue;
                }
            }
            committed.last_write.insert(slot, ticket);
            // Claims only take the slot.
            if let Some(apply) = apply {
                let state = next.get_or_insert_with(|| (*committed.state).clone());
                apply(state);
                applied += 1;
            }
        }

        if let Some(state) = next {
            committed.state = Arc::new(state);
            shared.snapshots.send_replace(Arc::clone(&committed.state));
        }

        Settled {
            snapshot: Arc::clone(&committed.state),
            outcome: Outcome::Committed { applied, discarded },
        }
    }
}

// ---------------------------------------------------------------------------
// InFlight
// ---------------------------------------------------------------------------

/// A dispatched event whose transition has not settled yet.
pub struct InFlight<S, E: DomainEvent, D, L> {
    driver: Driver<S, E, D, L>,
    ticket: u64,
    snapshot: Arc<S>,
    raw: RawEvent,
}

impl<S, E, D, L> InFlight<S, E, D, L>
where
    S: CacheState,
    E: DomainEvent,
    D: Send + Sync + 'static,
    L: SettingsLoader<S, D> + 'static,
{
    pub fn ticket(&self) -> u64 {
        self.ticket
    }

    pub fn event_name(&self) -> &str {
        &self.raw.event
    }

    /// Run the transition and commit its changes. On error nothing is
    /// committed.
    pub async fn settle(self) -> Result<Settled<S>, ReduceError> {
        let InFlight {
            driver,
            ticket,
            snapshot,
            raw,
        } = self;
        let shared = &driver.shared;

        let delivered = classify::<E>(&raw)?;

        // Every event folded into a cold state carries the settings,
        // unknown ones included.
        let fragment = if shared.settings.has_loaded(&snapshot) {
            None
        } else {
            debug!(event = %raw.event, "Settings not loaded, loading before transition");
            Some(shared.settings.load(&shared.deps).await?)
        };

        if let Delivered::Unknown(name) = &delivered {
            debug!(event = %name, "No transition registered, ignoring");
            let settled = driver.commit(ticket, fragment, Changes::none());
            return Ok(Settled {
                snapshot: settled.snapshot,
                outcome: Outcome::Ignored,
            });
        }

        let changes = match delivered {
            Delivered::SyncStatus(syncing) => {
                info!(syncing, "Sync status changed");
                Changes::one(SYNC_SLOT, move |state: &mut S| state.set_syncing(syncing))
            }
            Delivered::Domain(event) => match shared.table.get(event.kind()) {
                Some(transition) => {
                    let working: Cow<'_, S> = match &fragment {
                        Some(fragment) => {
                            let mut working = (*snapshot).clone();
                            shared.settings.merge(&mut working, fragment.clone());
                            Cow::Owned(working)
                        }
                        None => Cow::Borrowed(&*snapshot),
                    };
                    transition.prepare(&working, &event, &shared.deps).await?
                }
                None => Changes::none(),
            },
            Delivered::Unknown(_) => Changes::none(),
        };

        Ok(driver.commit(ticket, fragment, changes))
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Committed { applied: usize, discarded: usize },
    /// Unknown event name. Only lazily loaded settings may have changed.
    Ignored,
}

#[derive(Debug)]
pub struct Settled<S> {
    pub snapshot: Arc<S>,
    pub outcome: Outcome,
}

/// Totals for one `drive` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriveReport {
    pub events: usize,
    pub changes_applied: usize,
    pub changes_discarded: usize,
    pub ignored: usize,
    pub failed: usize,
}

#[derive(Default)]
struct DriveCounters {
    events: AtomicUsize,
    applied: AtomicUsize,
    discarded: AtomicUsize,
    ignored: AtomicUsize,
    failed: AtomicUsize,
}

impl DriveCounters {
    fn record(&self, outcome: &Outcome) {
        self.events.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Outcome::Committed { applied, discarded } => {
                self.applied.fetch_add(*applied, Ordering::Relaxed);
                self.discarded.fetch_add(*discarded, Ordering::Relaxed);
            }
            Outcome::Ignored => {
                self.ignored.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn into_report(self) -> DriveReport {
        let failed = self.failed.into_inner();
        DriveReport {
            events: self.events.into_inner() + failed,
            changes_applied: self.applied.into_inner(),
            changes_discarded: self.discarded.into_inner(),
            ignored: self.ignored.into_inner(),
            failed,
        }
    }
}
