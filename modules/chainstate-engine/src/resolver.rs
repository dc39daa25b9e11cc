//! Side-data resolution: contract reads and content-addressed fetches.
//!
//! The resolver does not deduplicate. Two transitions asking for the same
//! pointer at the same time perform two fetches.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use crate::error::ResolveError;
use crate::types::{EntityKey, Pointer};

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// A read-only contract method call, optionally keyed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContractCall {
    pub method: String,
    pub key: Option<EntityKey>,
}

impl ContractCall {
    pub fn keyed(method: impl Into<String>, key: &EntityKey) -> Self {
        Self {
            method: method.into(),
            key: Some(key.clone()),
        }
    }

    pub fn unkeyed(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            key: None,
        }
    }
}

impl fmt::Display for ContractCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}({key})", self.method),
            None => write!(f, "{}()", self.method),
        }
    }
}

/// Contract state as of chain head.
#[async_trait]
pub trait ContractReader: Send + Sync {
    /// `Ok(None)` when the contract returns nothing for this call.
    async fn call(&self, call: &ContractCall) -> Result<Option<Value>, ResolveError>;
}

/// Content-addressed payload store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, pointer: &Pointer) -> Result<Value, ResolveError>;
}

#[async_trait]
impl<C: ContractReader + ?Sized> ContractReader for Arc<C> {
    async fn call(&self, call: &ContractCall) -> Result<Option<Value>, ResolveError> {
        (**self).call(call).await
    }
}

#[async_trait]
impl<B: BlobStore + ?Sized> BlobStore for Arc<B> {
    async fn get(&self, pointer: &Pointer) -> Result<Value, ResolveError> {
        (**self).get(pointer).await
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct Resolver<C, B> {
    contract: C,
    store: B,
}

impl<C, B> Resolver<C, B>
where
    C: ContractReader,
    B: BlobStore,
{
    pub fn new(contract: C, store: B) -> Self {
        Self { contract, store }
    }

    /// Typed contract read. Missing or null values are absence.
    pub async fn read<T: DeserializeOwned>(&self, call: &ContractCall) -> Result<Option<T>, ResolveError> {
        match self.contract.call(call).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| ResolveError::Decode {
                    what: call.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Read a pointer field. An empty pointer means the referenced item was
    /// removed after the event being processed.
    pub async fn pointer(&self, call: &ContractCall) -> Result<Option<Pointer>, ResolveError> {
        let raw: Option<String> = self.read(call).await?;
        Ok(raw.as_deref().and_then(Pointer::parse))
    }

    /// Fetch and decode the payload behind `pointer`.
    pub async fn resolve<T: DeserializeOwned>(&self, pointer: &Pointer) -> Result<T, ResolveError> {
        let value = self.store.get(pointer).await?;
        serde_json::from_value(value).map_err(|e| ResolveError::Decode {
            what: format!("payload {pointer}"),
            message: e.to_string(),
        })
    }

    /// Read the pointer stored for `key` and resolve it. Absence at either
    /// step short-circuits to `Ok(None)`.
    pub async fn resolve_keyed<T: DeserializeOwned>(
        &self,
        method: &str,
        key: &EntityKey,
    ) -> Result<Option<T>, ResolveError> {
        let call = ContractCall::keyed(method, key);
        let Some(pointer) = self.pointer(&call).await? else {
            debug!(%call, "Pointer empty, nothing to resolve");
            return Ok(None);
        };
        self.resolve(&pointer).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::memory::{MemoryBlobStore, MemoryContract};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Card {
        name: String,
    }

    fn key(raw: &str) -> EntityKey {
        EntityKey::new(raw)
    }

    #[tokio::test]
    async fn keyed_resolution_follows_pointer_to_payload() {
        let contract = MemoryContract::new().on("getEntry", "0xa", json!("QmA"));
        let store = MemoryBlobStore::new().on("QmA", json!({ "name": "alice" }));
        let resolver = Resolver::new(contract, store);

        let card: Option<Card> = resolver.resolve_keyed("getEntry", &key("0xa")).await.unwrap();
        assert_eq!(card, Some(Card { name: "alice".into() }));
    }

    #[tokio::test]
    async fn empty_pointer_short_circuits_without_fetch() {
        let contract = MemoryContract::new().on("getEntry", "0xa", json!(""));
        let store = Arc::new(MemoryBlobStore::new());
        let resolver = Resolver::new(contract, store.clone());

        let card: Option<Card> = resolver.resolve_keyed("getEntry", &key("0xa")).await.unwrap();
        assert_eq!(card, None);
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn missing_contract_value_is_absence() {
        let resolver = Resolver::new(MemoryContract::new(), MemoryBlobStore::new());
        let card: Option<Card> = resolver.resolve_keyed("getEntry", &key("0xa")).await.unwrap();
        assert_eq!(card, None);
    }

    #[tokio::test]
    async fn unreachable_blob_is_a_resolution_error() {
        let contract = MemoryContract::new().on("getEntry", "0xa", json!("QmGone"));
        let resolver = Resolver::new(contract, MemoryBlobStore::new());

        let err = resolver
            .resolve_keyed::<Card>("getEntry", &key("0xa"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "resolution_error");
        assert!(matches!(err, ResolveError::Transport { .. }));
    }

    #[tokio::test]
    async fn undecodable_payload_is_a_resolution_error() {
        let contract = MemoryContract::new().on("getEntry", "0xa", json!("QmA"));
        let store = MemoryBlobStore::new().on("QmA", json!({ "nickname": 3 }));
        let resolver = Resolver::new(contract, store);

        let err = resolver
            .resolve_keyed::<Card>("getEntry", &key("0xa"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "resolution_error");
        assert!(err.message().contains("name"));
    }

    #[tokio::test]
    async fn concurrent_requests_are_not_deduplicated() {
        let contract = MemoryContract::new().on("getEntry", "0xa", json!("QmA"));
        let store = Arc::new(MemoryBlobStore::new().on("QmA", json!({ "name": "alice" })));
        let resolver = Resolver::new(contract, store.clone());

        let (ka, kb) = (key("0xa"), key("0xa"));
        let (a, b) = tokio::join!(
            resolver.resolve_keyed::<Card>("getEntry", &ka),
            resolver.resolve_keyed::<Card>("getEntry", &kb),
        );
        assert!(a.unwrap().is_some() && b.unwrap().is_some());
        assert_eq!(store.fetch_count(), 2);
    }
}
