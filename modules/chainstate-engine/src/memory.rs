//! In-memory collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use crate::error::ResolveError;
use crate::lock;
use crate::resolver::{BlobStore, ContractCall, ContractReader};
use crate::types::{EntityKey, Pointer};

// ---------------------------------------------------------------------------
// MemoryContract
// ---------------------------------------------------------------------------

/// Contract reads served from a map. Values can be changed while a driver
/// is running to mimic chain head moving on. Thread-safe.
#[derive(Default)]
pub struct MemoryContract {
    values: Mutex<HashMap<ContractCall, Value>>,
    failing: Mutex<HashMap<ContractCall, String>>,
    calls: AtomicUsize,
}

impl MemoryContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, method: &str, key: &str, value: Value) -> Self {
        self.set(method, key, value);
        self
    }

    pub fn on_unkeyed(self, method: &str, value: Value) -> Self {
        lock(&self.values).insert(ContractCall::unkeyed(method), value);
        self
    }

    pub fn set(&self, method: &str, key: &str, value: Value) {
        let call = ContractCall::keyed(method, &EntityKey::new(key));
        lock(&self.failing).remove(&call);
        lock(&self.values).insert(call, value);
    }

    /// Make every read of `method(key)` fail until the value is set again.
    pub fn fail(&self, method: &str, key: &str, message: &str) {
        let call = ContractCall::keyed(method, &EntityKey::new(key));
        lock(&self.values).remove(&call);
        lock(&self.failing).insert(call, message.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractReader for MemoryContract {
    async fn call(&self, call: &ContractCall) -> Result<Option<Value>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = lock(&self.failing).get(call) {
            return Err(ResolveError::ContractRead {
                call: call.to_string(),
                message: message.clone(),
            });
        }
        Ok(lock(&self.values).get(call).cloned())
    }
}

// ---------------------------------------------------------------------------
// MemoryBlobStore
// ---------------------------------------------------------------------------

/// Content-addressed store backed by a map. Unknown pointers fail with a
/// transport error, as an unreachable gateway would.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<Pointer, Value>>,
    gates: Mutex<HashMap<Pointer, FetchGate>>,
    fetches: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, pointer: &str, value: Value) -> Self {
        self.put(pointer, value);
        self
    }

    pub fn put(&self, pointer: &str, value: Value) {
        if let Some(pointer) = Pointer::parse(pointer) {
            lock(&self.blobs).insert(pointer, value);
        }
    }

    /// Hold the next fetch of `pointer` until the returned gate is released.
    pub fn hold(&self, pointer: &str) -> FetchGate {
        let gate = FetchGate::default();
        if let Some(pointer) = Pointer::parse(pointer) {
            lock(&self.gates).insert(pointer, gate.clone());
        }
        gate
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, pointer: &Pointer) -> Result<Value, ResolveError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let gate = lock(&self.gates).remove(pointer);
        if let Some(gate) = gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }

        lock(&self.blobs)
            .get(pointer)
            .cloned()
            .ok_or_else(|| ResolveError::Transport {
                pointer: pointer.clone(),
                message: "not found in memory store".to_string(),
            })
    }
}

/// Pauses one fetch mid-flight so tests can interleave other events.
#[derive(Clone, Default)]
pub struct FetchGate {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

impl FetchGate {
    /// Wait until the held fetch has begun.
    pub async fn started(&self) {
        self.started.notified().await;
    }

    /// Let the held fetch complete.
    pub fn release(&self) {
        self.release.notify_one();
    }
}
