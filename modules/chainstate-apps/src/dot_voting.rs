//! Dot voting: votes keyed by id, read straight from the contract.
//!
//! Vote settings change rarely, so they are loaded once on the first event
//! folded into a cold state and merged before that event's transition runs.

use async_trait::async_trait;
use chainstate_engine::{
    decode_fields, CacheState, Changes, ContractCall, DomainEvent, Driver, EntityCache, EntityKey,
    RawEvent, ReduceError, ResolveError, SettingsLoader, Transition, TransitionTable,
};
use chrono::{DateTime, Duration, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::Deps;

pub const VOTES: &str = "votes";
const GET_VOTE: &str = "getVote";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteSettings {
    pub global_candidate_support_pct: u64,
    pub min_participation_pct: u64,
    /// Seconds a vote stays open.
    pub vote_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub label: String,
    #[serde(deserialize_with = "uint")]
    pub support: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub metadata: String,
    pub open: bool,
    pub executed: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub snapshot_block: u64,
    pub total_voters: u64,
    pub candidates: Vec<Candidate>,
}

impl Vote {
    pub fn total_support(&self) -> u64 {
        self.candidates.iter().map(|c| c.support).sum()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DotVotingState {
    pub is_syncing: bool,
    pub votes: EntityCache<Vote>,
    pub settings: Option<VoteSettings>,
}

impl CacheState for DotVotingState {
    fn is_syncing(&self) -> bool {
        self.is_syncing
    }

    fn set_syncing(&mut self, syncing: bool) {
        self.is_syncing = syncing;
    }
}

fn votes(state: &mut DotVotingState) -> &mut EntityCache<Vote> {
    &mut state.votes
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DotVotingKind {
    StartVote,
    CastVote,
    ExecuteVote,
    ExecutionScript,
    UpdateQuorum,
    UpdateMinimumSupport,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DotVotingEvent {
    StartVote { vote_id: EntityKey },
    CastVote { vote_id: EntityKey, voter: EntityKey },
    ExecuteVote { vote_id: EntityKey },
    ExecutionScript,
    UpdateQuorum,
    UpdateMinimumSupport,
}

impl DotVotingEvent {
    pub fn vote_id(&self) -> Option<&EntityKey> {
        match self {
            DotVotingEvent::StartVote { vote_id }
            | DotVotingEvent::CastVote { vote_id, .. }
            | DotVotingEvent::ExecuteVote { vote_id } => Some(vote_id),
            _ => None,
        }
    }
}

/// Web3 delivers uint256 fields as decimal strings, in event fields and
/// call results alike; fixtures often use numbers.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdValue {
    Text(String),
    Number(u64),
}

fn uint<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match IdValue::deserialize(deserializer)? {
        IdValue::Number(n) => Ok(n),
        IdValue::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected an unsigned integer, got {text:?}"))),
    }
}

fn unix_seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    let secs = uint(deserializer)?;
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or_else(|| de::Error::custom(format!("timestamp {secs} out of range")))
}

impl From<IdValue> for EntityKey {
    fn from(id: IdValue) -> Self {
        match id {
            IdValue::Text(text) => EntityKey::new(text),
            IdValue::Number(n) => EntityKey::new(n.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct VoteFields {
    #[serde(rename = "voteId")]
    vote_id: IdValue,
}

#[derive(Deserialize)]
struct CastFields {
    #[serde(rename = "voteId")]
    vote_id: IdValue,
    voter: String,
}

impl DomainEvent for DotVotingEvent {
    type Kind = DotVotingKind;

    fn kind(&self) -> DotVotingKind {
        match self {
            DotVotingEvent::StartVote { .. } => DotVotingKind::StartVote,
            DotVotingEvent::CastVote { .. } => DotVotingKind::CastVote,
            DotVotingEvent::ExecuteVote { .. } => DotVotingKind::ExecuteVote,
            DotVotingEvent::ExecutionScript => DotVotingKind::ExecutionScript,
            DotVotingEvent::UpdateQuorum => DotVotingKind::UpdateQuorum,
            DotVotingEvent::UpdateMinimumSupport => DotVotingKind::UpdateMinimumSupport,
        }
    }

    fn decode(raw: &RawEvent) -> Result<Option<Self>, ReduceError> {
        let event = match raw.event.as_str() {
            "StartVote" => {
                let fields: VoteFields = decode_fields(raw)?;
                DotVotingEvent::StartVote {
                    vote_id: fields.vote_id.into(),
                }
            }
            "CastVote" => {
                let fields: CastFields = decode_fields(raw)?;
                DotVotingEvent::CastVote {
                    vote_id: fields.vote_id.into(),
                    voter: EntityKey::new(fields.voter),
                }
            }
            "ExecuteVote" => {
                let fields: VoteFields = decode_fields(raw)?;
                DotVotingEvent::ExecuteVote {
                    vote_id: fields.vote_id.into(),
                }
            }
            "ExecutionScript" => DotVotingEvent::ExecutionScript,
            "UpdateQuorum" => DotVotingEvent::UpdateQuorum,
            "UpdateMinimumSupport" => DotVotingEvent::UpdateMinimumSupport,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

pub struct VoteSettingsLoader;

#[derive(Deserialize)]
struct Setting(#[serde(deserialize_with = "uint")] u64);

async fn read_setting(deps: &Deps, method: &str) -> Result<u64, ResolveError> {
    let call = ContractCall::unkeyed(method);
    let value: Option<Setting> = deps.read(&call).await?;
    value.map(|Setting(value)| value).ok_or_else(|| ResolveError::ContractRead {
        call: call.to_string(),
        message: "returned nothing".to_string(),
    })
}

#[async_trait]
impl SettingsLoader<DotVotingState, Deps> for VoteSettingsLoader {
    type Fragment = VoteSettings;

    fn has_loaded(&self, state: &DotVotingState) -> bool {
        state.settings.is_some()
    }

    async fn load(&self, deps: &Deps) -> Result<VoteSettings, ResolveError> {
        let settings = VoteSettings {
            global_candidate_support_pct: read_setting(deps, "globalCandidateSupportPct").await?,
            min_participation_pct: read_setting(deps, "minParticipationPct").await?,
            vote_time: read_setting(deps, "voteTime").await?,
        };
        debug!(?settings, "Vote settings loaded");
        Ok(settings)
    }

    fn merge(&self, state: &mut DotVotingState, settings: VoteSettings) {
        state.settings.get_or_insert(settings);
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

/// Vote as returned by `getVote`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteRecord {
    #[serde(default)]
    metadata: String,
    open: bool,
    executed: bool,
    #[serde(deserialize_with = "unix_seconds")]
    start_date: DateTime<Utc>,
    #[serde(default, deserialize_with = "uint")]
    snapshot_block: u64,
    #[serde(default, deserialize_with = "uint")]
    total_voters: u64,
    #[serde(default)]
    candidates: Vec<Candidate>,
}

async fn load_vote(
    deps: &Deps,
    vote_id: EntityKey,
    settings: Option<VoteSettings>,
) -> Result<Option<Vote>, ResolveError> {
    let record: Option<VoteRecord> = deps.read(&ContractCall::keyed(GET_VOTE, &vote_id)).await?;
    Ok(record.map(|record| {
        let end_date = settings
            .and_then(|s| i64::try_from(s.vote_time).ok())
            .and_then(Duration::try_seconds)
            .and_then(|open_for| record.start_date.checked_add_signed(open_for));
        Vote {
            metadata: record.metadata,
            open: record.open,
            executed: record.executed,
            start_date: record.start_date,
            end_date,
            snapshot_block: record.snapshot_block,
            total_voters: record.total_voters,
            candidates: record.candidates,
        }
    }))
}

/// First sighting of a vote.
struct LoadVote;

#[async_trait]
impl Transition<DotVotingState, DotVotingEvent, Deps> for LoadVote {
    async fn prepare(
        &self,
        snapshot: &DotVotingState,
        event: &DotVotingEvent,
        deps: &Deps,
    ) -> Result<Changes<DotVotingState>, ReduceError> {
        let Some(vote_id) = event.vote_id() else {
            return Ok(Changes::none());
        };
        let settings = snapshot.settings;
        let change = snapshot
            .votes
            .plan_upsert(vote_id, |id| load_vote(deps, id, settings))
            .await?;
        Ok(Changes::cache(VOTES, change, votes))
    }
}

/// Tallies or execution changed; reload the vote in place.
struct RefreshVote;

#[async_trait]
impl Transition<DotVotingState, DotVotingEvent, Deps> for RefreshVote {
    async fn prepare(
        &self,
        snapshot: &DotVotingState,
        event: &DotVotingEvent,
        deps: &Deps,
    ) -> Result<Changes<DotVotingState>, ReduceError> {
        let Some(vote_id) = event.vote_id() else {
            return Ok(Changes::none());
        };
        let settings = snapshot.settings;
        let change = snapshot
            .votes
            .plan_update(vote_id, |id| load_vote(deps, id, settings))
            .await?;
        Ok(Changes::cache(VOTES, change, votes))
    }
}

/// `ExecutionScript`, `UpdateQuorum` and `UpdateMinimumSupport` are
/// recognised but have no entry, so they pass through.
pub fn transitions() -> TransitionTable<DotVotingState, DotVotingEvent, Deps> {
    TransitionTable::new()
        .on(DotVotingKind::StartVote, LoadVote)
        .on(DotVotingKind::CastVote, RefreshVote)
        .on(DotVotingKind::ExecuteVote, RefreshVote)
}

pub type DotVotingDriver = Driver<DotVotingState, DotVotingEvent, Deps, VoteSettingsLoader>;

pub fn driver(deps: Deps) -> DotVotingDriver {
    Driver::with_settings(transitions(), deps, VoteSettingsLoader)
}
