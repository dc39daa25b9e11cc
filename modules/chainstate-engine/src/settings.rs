//! One-time loading of slow-changing configuration.
//!
//! The loaded flag lives in the state itself, so a loader may run more than
//! once while the state is still cold. `merge` must therefore be idempotent.

use async_trait::async_trait;

use crate::error::ResolveError;

#[async_trait]
pub trait SettingsLoader<S, D>: Send + Sync {
    type Fragment: Clone + Send + Sync + 'static;

    fn has_loaded(&self, state: &S) -> bool;

    async fn load(&self, deps: &D) -> Result<Self::Fragment, ResolveError>;

    fn merge(&self, state: &mut S, fragment: Self::Fragment);
}

/// For apps without lazily loaded configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSettings;

#[async_trait]
impl<S: Sync, D: Sync> SettingsLoader<S, D> for NoSettings {
    type Fragment = ();

    fn has_loaded(&self, _state: &S) -> bool {
        true
    }

    async fn load(&self, _deps: &D) -> Result<(), ResolveError> {
        Ok(())
    }

    fn merge(&self, _state: &mut S, _fragment: ()) {}
}
