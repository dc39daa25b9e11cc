use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::info;

use crate::error::CommonError;

const DEFAULT_GATEWAY: &str = "https://ipfs.io";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONCURRENCY: usize = 8;

/// Replay configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // IPFS
    pub ipfs_gateway_url: String,
    pub ipfs_timeout: Duration,

    // Contract reads captured at chain head
    pub contract_snapshot: PathBuf,

    // Driver
    pub drive_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, CommonError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key → value source. `from_env` uses the process
    /// environment plus a `.env` file if present.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CommonError> {
        Ok(Self {
            ipfs_gateway_url: lookup("IPFS_GATEWAY_URL").unwrap_or_else(|| DEFAULT_GATEWAY.to_string()),
            ipfs_timeout: Duration::from_secs(parsed(&lookup, "IPFS_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?),
            contract_snapshot: PathBuf::from(required(&lookup, "CONTRACT_SNAPSHOT")?),
            drive_concurrency: parsed(&lookup, "DRIVE_CONCURRENCY", DEFAULT_CONCURRENCY)?.max(1),
        })
    }

    /// Log the effective configuration.
    pub fn log_redacted(&self) {
        info!(
            ipfs_gateway_url = %redact_userinfo(&self.ipfs_gateway_url),
            ipfs_timeout_secs = self.ipfs_timeout.as_secs(),
            contract_snapshot = %self.contract_snapshot.display(),
            drive_concurrency = self.drive_concurrency,
            "Configuration loaded"
        );
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String, CommonError> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CommonError::Config(format!("{key} environment variable is required")))
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CommonError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| CommonError::Config(format!("{key} must be a number, got {raw:?}"))),
    }
}

/// Gateways with basic auth carry credentials in the URL.
fn redact_userinfo(url: &str) -> String {
    match (url.find("://"), url.find('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, CommonError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_optional_vars_missing() {
        let config = config(&[("CONTRACT_SNAPSHOT", "snapshot.json")]).unwrap();
        assert_eq!(config.ipfs_gateway_url, "https://ipfs.io");
        assert_eq!(config.ipfs_timeout, Duration::from_secs(30));
        assert_eq!(config.drive_concurrency, 8);
        assert_eq!(config.contract_snapshot, PathBuf::from("snapshot.json"));
    }

    #[test]
    fn snapshot_path_is_required() {
        let err = config(&[]).unwrap_err();
        assert!(err.to_string().contains("CONTRACT_SNAPSHOT"));
    }

    #[test]
    fn non_numeric_concurrency_is_rejected() {
        let err = config(&[("CONTRACT_SNAPSHOT", "s.json"), ("DRIVE_CONCURRENCY", "lots")]).unwrap_err();
        assert!(matches!(err, CommonError::Config(_)));
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let config = config(&[("CONTRACT_SNAPSHOT", "s.json"), ("DRIVE_CONCURRENCY", "0")]).unwrap();
        assert_eq!(config.drive_concurrency, 1);
    }

    #[test]
    fn credentials_are_redacted() {
        assert_eq!(
            redact_userinfo("https://user:pw@gateway.example"),
            "https://***@gateway.example"
        );
        assert_eq!(redact_userinfo("https://ipfs.io"), "https://ipfs.io");
    }
}
