// Collaborator adapters.
//
// IpfsBlobStore wraps the gateway client behind BlobStore.
// SnapshotContract serves contract reads captured at chain head from a
// JSON file, for offline replay.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chainstate_common::CommonError;
use chainstate_engine::{BlobStore, ContractCall, ContractReader, EntityKey, Pointer, ResolveError};
use ipfs_client::{IpfsClient, IpfsError};
use serde::Deserialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// IpfsBlobStore
// ---------------------------------------------------------------------------

pub struct IpfsBlobStore {
    client: IpfsClient,
}

impl IpfsBlobStore {
    pub fn new(client: IpfsClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobStore for IpfsBlobStore {
    async fn get(&self, pointer: &Pointer) -> Result<Value, ResolveError> {
        self.client
            .get_json(pointer.as_str())
            .await
            .map_err(|err| resolution_error(pointer, err))
    }
}

fn resolution_error(pointer: &Pointer, err: IpfsError) -> ResolveError {
    match err {
        IpfsError::Network(_) | IpfsError::Gateway { .. } => ResolveError::Transport {
            pointer: pointer.clone(),
            message: err.to_string(),
        },
        IpfsError::Parse(_) | IpfsError::InvalidCid(_) => ResolveError::Decode {
            what: format!("payload {pointer}"),
            message: err.to_string(),
        },
    }
}

// ---------------------------------------------------------------------------
// SnapshotContract
// ---------------------------------------------------------------------------

/// File layout:
///
/// ```json
/// {
///   "keyed":   { "getEntry": { "0xabc…": "Qm…" }, "getVote": { "1": { … } } },
///   "unkeyed": { "voteTime": 86400 }
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    keyed: HashMap<String, HashMap<String, Value>>,
    #[serde(default)]
    unkeyed: HashMap<String, Value>,
}

#[derive(Debug, Default)]
pub struct SnapshotContract {
    values: HashMap<ContractCall, Value>,
}

impl SnapshotContract {
    pub fn load(path: &Path) -> Result<Self, CommonError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CommonError::Snapshot(format!("reading {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CommonError> {
        let file: SnapshotFile =
            serde_json::from_str(raw).map_err(|e| CommonError::Snapshot(e.to_string()))?;

        let mut values = HashMap::new();
        for (method, entries) in file.keyed {
            for (key, value) in entries {
                values.insert(ContractCall::keyed(method.clone(), &EntityKey::new(key)), value);
            }
        }
        for (method, value) in file.unkeyed {
            values.insert(ContractCall::unkeyed(method), value);
        }
        Ok(Self { values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl ContractReader for SnapshotContract {
    async fn call(&self, call: &ContractCall) -> Result<Option<Value>, ResolveError> {
        Ok(self.values.get(call).cloned())
    }
}
