//! Projects: GitHub authorisation outcome.
//!
//! The sign-in popup posts a token request result back to the app, which
//! re-enters the store as a triggered event. No side data is needed.

use async_trait::async_trait;
use chainstate_engine::{
    decode_fields, CacheState, Changes, DomainEvent, Driver, RawEvent, ReduceError, Slot,
    Transition, TransitionTable,
};
use serde::{Deserialize, Serialize};

pub const REQUESTED_GITHUB_TOKEN_SUCCESS: &str = "REQUESTED_GITHUB_TOKEN_SUCCESS";
pub const REQUESTED_GITHUB_TOKEN_FAILURE: &str = "REQUESTED_GITHUB_TOKEN_FAILURE";

const GITHUB_SLOT: Slot = Slot::Field("github");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GithubStatus {
    #[default]
    Initial,
    Authenticated,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GithubAuth {
    pub status: GithubStatus,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectsState {
    pub is_syncing: bool,
    pub github: GithubAuth,
}

impl CacheState for ProjectsState {
    fn is_syncing(&self) -> bool {
        self.is_syncing
    }

    fn set_syncing(&mut self, syncing: bool) {
        self.is_syncing = syncing;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectsKind {
    TokenSucceeded,
    TokenFailed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectsEvent {
    TokenSucceeded { token: String },
    TokenFailed,
}

#[derive(Deserialize)]
struct TokenFields {
    token: String,
}

impl DomainEvent for ProjectsEvent {
    type Kind = ProjectsKind;

    fn kind(&self) -> ProjectsKind {
        match self {
            ProjectsEvent::TokenSucceeded { .. } => ProjectsKind::TokenSucceeded,
            ProjectsEvent::TokenFailed => ProjectsKind::TokenFailed,
        }
    }

    fn decode(raw: &RawEvent) -> Result<Option<Self>, ReduceError> {
        match raw.event.as_str() {
            REQUESTED_GITHUB_TOKEN_SUCCESS => {
                let fields: TokenFields = decode_fields(raw)?;
                Ok(Some(ProjectsEvent::TokenSucceeded {
                    token: fields.token,
                }))
            }
            // The failure payload's token is always null; ignore it.
            REQUESTED_GITHUB_TOKEN_FAILURE => Ok(Some(ProjectsEvent::TokenFailed)),
            _ => Ok(None),
        }
    }
}

struct RecordGithubAuth;

#[async_trait]
impl<D: Sync> Transition<ProjectsState, ProjectsEvent, D> for RecordGithubAuth {
    async fn prepare(
        &self,
        _snapshot: &ProjectsState,
        event: &ProjectsEvent,
        _deps: &D,
    ) -> Result<Changes<ProjectsState>, ReduceError> {
        let auth = match event {
            ProjectsEvent::TokenSucceeded { token } => GithubAuth {
                status: GithubStatus::Authenticated,
                token: Some(token.clone()),
            },
            ProjectsEvent::TokenFailed => GithubAuth {
                status: GithubStatus::Failed,
                token: None,
            },
        };
        Ok(Changes::one(GITHUB_SLOT, move |state: &mut ProjectsState| {
            state.github = auth;
        }))
    }
}

pub fn transitions<D: Send + Sync + 'static>() -> TransitionTable<ProjectsState, ProjectsEvent, D> {
    TransitionTable::new()
        .on(ProjectsKind::TokenSucceeded, RecordGithubAuth)
        .on(ProjectsKind::TokenFailed, RecordGithubAuth)
}

pub type ProjectsDriver<D> = Driver<ProjectsState, ProjectsEvent, D>;

pub fn driver<D: Send + Sync + 'static>(deps: D) -> ProjectsDriver<D> {
    Driver::new(transitions(), deps)
}
