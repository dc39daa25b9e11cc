pub mod error;

pub use error::{IpfsError, Result};

use std::time::Duration;

use serde::de::DeserializeOwned;

pub struct IpfsClient {
    client: reqwest::Client,
    gateway_url: String,
}

impl IpfsClient {
    pub fn new(gateway_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn gateway_url(&self) -> &str {
        &self.gateway_url
    }

    /// Fetch the raw bytes stored under `cid` via the gateway's `/ipfs/` path.
    pub async fn cat(&self, cid: &str) -> Result<Vec<u8>> {
        let cid = validate_cid(cid)?;
        let url = format!("{}/ipfs/{}", self.gateway_url, cid);

        tracing::debug!(cid, "Fetching from IPFS gateway");
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(IpfsError::Gateway {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.bytes().await?.to_vec())
    }

    /// Fetch `cid` and decode it as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, cid: &str) -> Result<T> {
        let bytes = self.cat(cid).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// CIDs are base-encoded hashes; anything with path or query syntax would
/// let a contract-supplied value escape the `/ipfs/` namespace.
fn validate_cid(cid: &str) -> Result<&str> {
    let cid = cid.trim();
    let valid = !cid.is_empty() && cid.chars().all(|c| c.is_ascii_alphanumeric());
    if valid {
        Ok(cid)
    } else {
        Err(IpfsError::InvalidCid(cid.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_v0_and_v1_cids() {
        assert!(validate_cid("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").is_ok());
        assert!(validate_cid("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi").is_ok());
    }

    #[test]
    fn rejects_path_syntax() {
        assert!(matches!(validate_cid("Qm/../secret"), Err(IpfsError::InvalidCid(_))));
        assert!(matches!(validate_cid("Qm?x=1"), Err(IpfsError::InvalidCid(_))));
        assert!(matches!(validate_cid(""), Err(IpfsError::InvalidCid(_))));
    }

    #[test]
    fn trailing_slash_is_trimmed_from_gateway() {
        let client = IpfsClient::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.gateway_url(), "http://localhost:8080");
    }
}
