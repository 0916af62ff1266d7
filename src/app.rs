//! Wiring of the feed, cache, ledger and processor from an [`AppConfig`].

use crate::core::cache::RateCache;
use crate::core::config::AppConfig;
use crate::core::converter::Converter;
use crate::core::ledger::PortfolioLedger;
use crate::core::processor::TransactionProcessor;
use crate::core::rate::RateSource;
use crate::core::store::RecordStore;
use crate::core::transaction::{KnownParties, OpenDirectory, PartyDirectory};
use crate::providers::coingecko::CoinGeckoSource;
use crate::store;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct App {
    pub config: AppConfig,
    pub source: Arc<dyn RateSource>,
    pub cache: Arc<RateCache>,
    pub converter: Converter,
    pub ledger: Arc<PortfolioLedger>,
    pub processor: TransactionProcessor,
}

impl App {
    /// Builds the app on the CoinGecko feed and the on-disk record store.
    pub async fn new(config: AppConfig) -> Result<Self> {
        let coingecko = config.providers.coingecko.clone().unwrap_or_default();
        let source = CoinGeckoSource::new(
            &coingecko.base_url,
            &coingecko.ids,
            config.rates.fetch_timeout(),
        )
        .context("Failed to create CoinGecko client")?;

        let data_path = config.default_data_path()?;
        let store = store::open_store(Some(&data_path))?;
        Self::with_parts(config, Arc::new(source), store).await
    }

    /// Builds the app on the given feed and store, then seeds the configured
    /// accounts that do not exist yet.
    pub async fn with_parts(
        config: AppConfig,
        source: Arc<dyn RateSource>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        let pivot = config.pivot();
        let cache = Arc::new(RateCache::new(
            Arc::clone(&source),
            config.rates.ttl(),
            config.rates.fetch_timeout(),
        ));
        let converter = Converter::new(Arc::clone(&cache), &pivot);
        let ledger = Arc::new(
            PortfolioLedger::new(store, &config.fiat).with_default_cash(config.default_cash.clone()),
        );

        let directory: Arc<dyn PartyDirectory> = if config.known_parties_only {
            let parties: HashSet<String> =
                config.accounts.iter().map(|a| a.owner.clone()).collect();
            debug!("Restricting parties to {} accounts", parties.len());
            Arc::new(KnownParties(parties))
        } else {
            Arc::new(OpenDirectory)
        };
        let processor =
            TransactionProcessor::new(Arc::clone(&ledger), converter.clone(), directory);

        for account in &config.accounts {
            let holdings: Vec<_> = account
                .holdings
                .iter()
                .map(|h| (h.symbol.clone(), h.amount, h.cost_basis))
                .collect();
            if ledger
                .seed(&account.owner, &account.cash, &holdings)
                .await
                .with_context(|| format!("Failed to seed account {}", account.owner))?
            {
                info!("Seeded account {} from config", account.owner);
            }
        }

        Ok(App {
            config,
            source,
            cache,
            converter,
            ledger,
            processor,
        })
    }

    pub fn pivot(&self) -> &str {
        self.converter.pivot()
    }

    /// Owners named on the command line, or every configured account.
    pub fn owners_or_accounts(&self, owners: &[String]) -> Vec<String> {
        if owners.is_empty() {
            self.config.accounts.iter().map(|a| a.owner.clone()).collect()
        } else {
            owners.to_vec()
        }
    }
}
