//! Keyed, insertion-ordered entity collection.
//!
//! The loader-driven operations (`upsert`, `update`) are split into a plan
//! step that may await a loader against one snapshot, and a synchronous
//! `CacheChange::apply` that re-checks membership against whatever cache it
//! is applied to. Transitions plan against a captured snapshot and apply at
//! commit time, so a stale plan can never duplicate a key.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::types::{Entity, EntityKey};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityCache<P> {
    entities: Vec<Entity<P>>,
}

impl<P> Default for EntityCache<P> {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
        }
    }
}

impl<P> EntityCache<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity<P>> {
        self.entities.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.entities.iter().map(|e| &e.key)
    }

    /// Index of the entity stored under `key`, if any.
    pub fn position(&self, key: &EntityKey) -> Option<usize> {
        self.entities.iter().position(|e| &e.key == key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.position(key).is_some()
    }

    pub fn get(&self, key: &EntityKey) -> Option<&P> {
        self.position(key).map(|i| &self.entities[i].data)
    }
}

impl<P: Clone> EntityCache<P> {
    /// Add `key` unless it is already cached. The loader runs only for new
    /// keys; a loader returning `None` leaves the cache unchanged.
    pub async fn upsert<F, Fut, E>(&self, key: &EntityKey, loader: F) -> Result<Self, E>
    where
        F: FnOnce(EntityKey) -> Fut,
        Fut: Future<Output = Result<Option<P>, E>>,
    {
        let change = self.plan_upsert(key, loader).await?;
        Ok(self.with(change))
    }

    /// Delete `key` if present. Missing keys are a no-op.
    pub fn remove(&self, key: &EntityKey) -> Self {
        self.with(CacheChange::Remove(key.clone()))
    }

    /// Reload the payload for a cached `key` in place, or treat an unknown
    /// key as a first sighting.
    pub async fn update<F, Fut, E>(&self, key: &EntityKey, loader: F) -> Result<Self, E>
    where
        F: FnOnce(EntityKey) -> Fut,
        Fut: Future<Output = Result<Option<P>, E>>,
    {
        let change = self.plan_update(key, loader).await?;
        Ok(self.with(change))
    }

    fn with(&self, change: CacheChange<P>) -> Self {
        let mut next = self.clone();
        change.apply(&mut next);
        next
    }
}

impl<P> EntityCache<P> {
    pub async fn plan_upsert<F, Fut, E>(&self, key: &EntityKey, loader: F) -> Result<CacheChange<P>, E>
    where
        F: FnOnce(EntityKey) -> Fut,
        Fut: Future<Output = Result<Option<P>, E>>,
    {
        if self.contains(key) {
            return Ok(CacheChange::Keep(key.clone()));
        }
        Ok(match loader(key.clone()).await? {
            Some(data) => CacheChange::Insert(Entity::new(key.clone(), data)),
            None => CacheChange::Unchanged,
        })
    }

    pub async fn plan_update<F, Fut, E>(&self, key: &EntityKey, loader: F) -> Result<CacheChange<P>, E>
    where
        F: FnOnce(EntityKey) -> Fut,
        Fut: Future<Output = Result<Option<P>, E>>,
    {
        if !self.contains(key) {
            return self.plan_upsert(key, loader).await;
        }
        Ok(match loader(key.clone()).await? {
            Some(data) => CacheChange::Replace(Entity::new(key.clone(), data)),
            // Pointer went empty; a removal event is on its way.
            None => CacheChange::Keep(key.clone()),
        })
    }
}

// ---------------------------------------------------------------------------
// CacheChange
// ---------------------------------------------------------------------------

/// A planned mutation, re-validated against the cache it is applied to.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheChange<P> {
    Unchanged,
    /// The key stays as cached. Writes nothing but still claims the key's
    /// slot, so an older in-flight removal cannot land after it.
    Keep(EntityKey),
    /// Append unless the key is already present.
    Insert(Entity<P>),
    /// Replace in place, or append if the key has gone missing.
    Replace(Entity<P>),
    Remove(EntityKey),
}

impl<P> CacheChange<P> {
    pub fn key(&self) -> Option<&EntityKey> {
        match self {
            CacheChange::Unchanged => None,
            CacheChange::Insert(entity) | CacheChange::Replace(entity) => Some(&entity.key),
            CacheChange::Keep(key) | CacheChange::Remove(key) => Some(key),
        }
    }

    /// Apply to `cache`. Returns whether anything changed.
    pub fn apply(self, cache: &mut EntityCache<P>) -> bool {
        match self {
            CacheChange::Unchanged | CacheChange::Keep(_) => false,
            CacheChange::Insert(entity) => {
                if cache.contains(&entity.key) {
                    return false;
                }
                cache.entities.push(entity);
                true
            }
            CacheChange::Replace(entity) => {
                match cache.position(&entity.key) {
                    Some(index) => cache.entities[index] = entity,
                    None => cache.entities.push(entity),
                }
                true
            }
            CacheChange::Remove(key) => match cache.position(&key) {
                Some(index) => {
                    cache.entities.remove(index);
                    true
                }
                None => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn key(raw: &str) -> EntityKey {
        EntityKey::new(raw)
    }

    async fn found(data: &'static str) -> Result<Option<String>, Infallible> {
        Ok(Some(data.to_string()))
    }

    async fn cache_of(keys: &[&str]) -> EntityCache<String> {
        let mut cache = EntityCache::new();
        for k in keys {
            cache = cache.upsert(&key(k), |_| found("seed")).await.unwrap();
        }
        cache
    }

    #[tokio::test]
    async fn upsert_twice_keeps_one_record() {
        let once = cache_of(&["0xa"]).await;
        let twice = once.upsert(&key("0xa"), |_| found("other")).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.len(), 1);
        assert_eq!(twice.get(&key("0xa")).unwrap(), "seed");
    }

    #[tokio::test]
    async fn upsert_skips_loader_for_cached_key() {
        let calls = AtomicUsize::new(0);
        let cache = cache_of(&["0xa"]).await;
        let _ = cache
            .upsert(&key("0xa"), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                found("x")
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upsert_with_absent_payload_inserts_nothing() {
        let cache: EntityCache<String> = EntityCache::new();
        let next = cache
            .upsert(&key("0xa"), |_| async { Ok::<_, Infallible>(None) })
            .await
            .unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn upsert_preserves_insertion_order() {
        let cache = cache_of(&["0xc", "0xa", "0xb"]).await;
        let keys: Vec<_> = cache.keys().map(|k| k.as_str().to_string()).collect();
        assert_eq!(keys, vec!["0xc", "0xa", "0xb"]);
    }

    #[tokio::test]
    async fn remove_entity_at_index_zero() {
        let cache = cache_of(&["0xa", "0xb"]).await;
        assert_eq!(cache.position(&key("0xa")), Some(0));
        let next = cache.remove(&key("0xa"));
        assert!(!next.contains(&key("0xa")));
        assert_eq!(next.len(), 1);
    }

    #[tokio::test]
    async fn remove_missing_key_is_noop() {
        let cache = cache_of(&["0xa"]).await;
        assert_eq!(cache.remove(&key("0xz")), cache);
    }

    #[tokio::test]
    async fn update_replaces_in_place() {
        let cache = cache_of(&["0xa", "0xb", "0xc"]).await;
        let next = cache.update(&key("0xb"), |_| found("fresh")).await.unwrap();
        assert_eq!(next.position(&key("0xb")), Some(1));
        assert_eq!(next.get(&key("0xb")).unwrap(), "fresh");
        assert_eq!(next.len(), 3);
    }

    #[tokio::test]
    async fn update_of_first_entity_is_not_mistaken_for_missing() {
        let cache = cache_of(&["0xa", "0xb"]).await;
        let next = cache.update(&key("0xa"), |_| found("fresh")).await.unwrap();
        assert_eq!(next.len(), 2);
        assert_eq!(next.position(&key("0xa")), Some(0));
        assert_eq!(next.get(&key("0xa")).unwrap(), "fresh");
    }

    #[tokio::test]
    async fn update_unknown_key_is_a_first_sighting() {
        let cache = cache_of(&["0xa"]).await;
        let next = cache.update(&key("0xb"), |_| found("new")).await.unwrap();
        assert_eq!(next.position(&key("0xb")), Some(1));
    }

    #[tokio::test]
    async fn update_with_absent_payload_keeps_cached_data() {
        let cache = cache_of(&["0xa"]).await;
        let next = cache
            .update(&key("0xa"), |_| async { Ok::<_, Infallible>(None) })
            .await
            .unwrap();
        assert_eq!(next, cache);
    }

    #[tokio::test]
    async fn loader_errors_propagate_and_leave_cache_alone() {
        let cache = cache_of(&["0xa"]).await;
        let result = cache
            .upsert(&key("0xb"), |_| async { Err::<Option<String>, _>("boom") })
            .await;
        assert_eq!(result.unwrap_err(), "boom");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn cached_key_plans_keep_its_slot() {
        let cache = cache_of(&["0xa"]).await;
        let plan = cache.plan_upsert(&key("0xa"), |_| found("x")).await.unwrap();
        assert_eq!(plan, CacheChange::Keep(key("0xa")));
        assert_eq!(plan.key(), Some(&key("0xa")));

        let plan = cache
            .plan_update(&key("0xa"), |_| async { Ok::<_, Infallible>(None) })
            .await
            .unwrap();
        assert_eq!(plan, CacheChange::Keep(key("0xa")));

        let mut applied = cache.clone();
        assert!(!plan.apply(&mut applied));
        assert_eq!(applied, cache);
    }

    #[tokio::test]
    async fn absent_payload_for_new_key_plans_nothing() {
        let cache: EntityCache<String> = EntityCache::new();
        let plan = cache
            .plan_upsert(&key("0xa"), |_| async { Ok::<_, Infallible>(None) })
            .await
            .unwrap();
        assert_eq!(plan, CacheChange::Unchanged);
        assert_eq!(plan.key(), None);
    }

    #[test]
    fn stale_insert_plan_does_not_duplicate() {
        let mut cache = EntityCache::new();
        let plan = CacheChange::Insert(Entity::new(key("0xa"), "first".to_string()));
        let again = plan.clone();
        assert!(plan.apply(&mut cache));
        assert!(!again.apply(&mut cache));
        assert_eq!(cache.len(), 1);
    }
}
