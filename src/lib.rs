pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::cli::balance::BalanceOptions;
use crate::core::cache::Store;
use crate::core::config::AppConfig;
use crate::providers::{CachingPsdProvider, PsdApiProvider};
use crate::store::KeyValueStore;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, info, warn};

const REFERENCE_COLLECTION: &str = "psd_reference";

pub enum AppCommand {
    Commodities { filter: Option<String> },
    Countries { filter: Option<String> },
    Attributes,
    Balance(BalanceOptions),
    Refresh,
}

pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:?}");
    Ok(config)
}

/// Builds the API client behind the reference cache described by `config`.
pub fn build_provider(config: &AppConfig) -> Result<CachingPsdProvider<PsdApiProvider>> {
    let api = PsdApiProvider::from_config(&config.api)?;

    let store = open_store(config.cache.persist, || config.default_data_path());
    let collection = store
        .get_collection(REFERENCE_COLLECTION, store.is_persistent(), true)
        .context("Failed to open reference data cache")?;

    Ok(CachingPsdProvider::new(api, collection, config.cache.ttl()))
}

/// On-disk store under the data directory when `persist` is set and the
/// directory is known, in-memory otherwise.
fn open_store(persist: bool, data_path: impl FnOnce() -> Result<PathBuf>) -> KeyValueStore {
    if !persist {
        return KeyValueStore::in_memory();
    }
    match data_path() {
        Ok(path) => KeyValueStore::open(Some(&path)),
        Err(e) => {
            warn!(error = %e, "No data directory for the cache, keeping it in memory");
            KeyValueStore::in_memory()
        }
    }
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("PSD calculator starting...");

    let config = load_config(config_path)?;
    let provider = build_provider(&config)?;

    match command {
        AppCommand::Commodities { filter } => {
            cli::lookup::commodities(&provider, filter.as_deref()).await
        }
        AppCommand::Countries { filter } => {
            cli::lookup::countries(&provider, filter.as_deref()).await
        }
        AppCommand::Attributes => cli::lookup::attributes(&provider).await,
        AppCommand::Balance(options) => {
            cli::balance::run(&provider, &options, config.market_year).await
        }
        AppCommand::Refresh => {
            provider.refresh().await;
            println!("Cached reference data cleared.");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_store_without_data_dir_stays_in_memory() {
        let store = open_store(true, || {
            Err(anyhow::anyhow!("Could not determine project directories"))
        });
        assert!(!store.is_persistent());
        assert!(
            store
                .get_collection(REFERENCE_COLLECTION, store.is_persistent(), true)
                .is_some()
        );
    }

    #[test]
    fn test_open_store_persists_under_data_dir() {
        let temp_dir = TempDir::new().unwrap();
        let store = open_store(true, || Ok(temp_dir.path().to_path_buf()));
        assert!(store.is_persistent());

        let store = open_store(false, || Ok(temp_dir.path().to_path_buf()));
        assert!(!store.is_persistent());
    }
}
