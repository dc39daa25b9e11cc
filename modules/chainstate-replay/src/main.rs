use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chainstate_apps::{address_book, deps, dot_voting, projects, Deps, IpfsBlobStore, SnapshotContract};
use chainstate_common::Config;
use chainstate_engine::{CacheState, DomainEvent, Driver, RawEvent, SettingsLoader};
use ipfs_client::IpfsClient;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum App {
    AddressBook,
    DotVoting,
    Projects,
}

#[derive(Parser)]
#[command(name = "replay", about = "Fold a recorded event feed into app state")]
struct Cli {
    /// Which app's reducer to run
    #[arg(long, value_enum)]
    app: App,

    /// Newline-delimited JSON events, one `{ "event", "returnValues" }` per line
    events: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("chainstate=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_redacted();

    let contract = SnapshotContract::load(&config.contract_snapshot)?;
    info!(reads = contract.len(), "Contract snapshot loaded");

    let client = IpfsClient::new(&config.ipfs_gateway_url, config.ipfs_timeout)?;
    let deps = deps(Arc::new(contract), Arc::new(IpfsBlobStore::new(client)));

    let events = read_events(&cli.events).await?;
    info!(app = ?cli.app, events = events.len(), "Replaying feed");

    let concurrency = config.drive_concurrency;
    match cli.app {
        App::AddressBook => replay(address_book::driver(deps), events, concurrency).await,
        App::DotVoting => replay(dot_voting::driver(deps), events, concurrency).await,
        App::Projects => replay(projects::driver(deps), events, concurrency).await,
    }
}

async fn replay<S, E, L>(driver: Driver<S, E, Deps, L>, events: Vec<RawEvent>, concurrency: usize) -> Result<()>
where
    S: CacheState + Serialize,
    E: DomainEvent,
    L: SettingsLoader<S, Deps> + 'static,
{
    let report = driver.drive(futures::stream::iter(events), concurrency).await;
    info!(
        events = report.events,
        applied = report.changes_applied,
        discarded = report.changes_discarded,
        ignored = report.ignored,
        failed = report.failed,
        "Replay complete"
    );

    let snapshot = driver.snapshot();
    println!("{}", serde_json::to_string_pretty(&*snapshot)?);
    Ok(())
}

async fn read_events(path: &Path) -> Result<Vec<RawEvent>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Reading events from {}", path.display()))?;

    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<RawEvent>(line).with_context(|| format!("{}:{}: malformed event", path.display(), i + 1))
        })
        .collect()
}
