use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Url;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, instrument};

use super::util::with_retry;
use crate::core::rate::{PriceQuote, RateSource};

// Only connection failures are retried; HTTP errors such as 429 are returned
// as is. Retries run inside the rate cache's fetch timeout, so a slow feed
// fails with that timeout rather than being retried past it.
const RETRIES: usize = 1;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// CoinGecko ids for the assets the feed knows out of the box.
const KNOWN_IDS: &[(&str, &str)] = &[
    ("BTC", "bitcoin"),
    ("ETH", "ethereum"),
    ("BNB", "binancecoin"),
    ("XRP", "ripple"),
    ("ADA", "cardano"),
    ("SOL", "solana"),
    ("DOT", "polkadot"),
    ("DOGE", "dogecoin"),
    ("AVAX", "avalanche-2"),
    ("MATIC", "matic-network"),
    ("LINK", "chainlink"),
    ("UNI", "uniswap"),
    ("USDT", "tether"),
    ("USDC", "usd-coin"),
    ("DAI", "dai"),
    ("BUSD", "binance-usd"),
];

/// Prices assets in USD through CoinGecko's `simple/price` endpoint.
pub struct CoinGeckoSource {
    base_url: String,
    ids: HashMap<String, String>,
    client: reqwest::Client,
}

impl CoinGeckoSource {
    /// `overrides` maps symbols to CoinGecko ids on top of the built-in
    /// table. Requests give up after `timeout`.
    pub fn new(base_url: &str, overrides: &HashMap<String, String>, timeout: Duration) -> Result<Self> {
        let mut ids: HashMap<String, String> = KNOWN_IDS
            .iter()
            .map(|(symbol, id)| (symbol.to_string(), id.to_string()))
            .collect();
        for (symbol, id) in overrides {
            ids.insert(symbol.trim().to_uppercase(), id.trim().to_string());
        }

        let client = reqwest::Client::builder()
            .user_agent("xbridge/0.1")
            .timeout(timeout)
            .build()?;
        Ok(CoinGeckoSource {
            base_url: base_url.trim_end_matches('/').to_string(),
            ids,
            client,
        })
    }

    /// CoinGecko id for a symbol; unknown symbols fall back to their
    /// lower-cased name.
    pub fn coin_id(&self, symbol: &str) -> String {
        self.ids
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| symbol.to_lowercase())
    }
}

#[derive(Deserialize, Debug)]
struct SimplePrice {
    usd: Option<Decimal>,
    usd_market_cap: Option<Decimal>,
    usd_24h_vol: Option<Decimal>,
    usd_24h_change: Option<Decimal>,
    last_updated_at: Option<i64>,
}

impl From<SimplePrice> for PriceQuote {
    fn from(price: SimplePrice) -> Self {
        PriceQuote {
            usd: price.usd,
            market_cap: price.usd_market_cap,
            volume_24h: price.usd_24h_vol,
            change_24h: price.usd_24h_change,
            last_updated_at: price
                .last_updated_at
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        }
    }
}

#[async_trait]
impl RateSource for CoinGeckoSource {
    #[instrument(name = "CoinGeckoPriceFetch", skip(self, symbols), fields(count = symbols.len()))]
    async fn fetch_prices(&self, symbols: &HashSet<String>) -> Result<HashMap<String, PriceQuote>> {
        // several symbols may share one id
        let mut symbols_by_id: BTreeMap<String, Vec<&String>> = BTreeMap::new();
        for symbol in symbols {
            symbols_by_id
                .entry(self.coin_id(symbol))
                .or_default()
                .push(symbol);
        }
        if symbols_by_id.is_empty() {
            return Ok(HashMap::new());
        }

        let ids = symbols_by_id.keys().cloned().collect::<Vec<_>>().join(",");
        let url = Url::parse_with_params(
            &format!("{}/simple/price", self.base_url),
            &[
                ("ids", ids.as_str()),
                ("vs_currencies", "usd"),
                ("include_market_cap", "true"),
                ("include_24hr_vol", "true"),
                ("include_24hr_change", "true"),
                ("include_last_updated_at", "true"),
            ],
        )
        .map_err(|e| anyhow!("Invalid CoinGecko URL {}: {}", self.base_url, e))?;
        debug!("Requesting prices from {}", url);

        let response = with_retry(|| self.client.get(url.clone()).send(), RETRIES, RETRY_DELAY)
            .await
            .map_err(|e| anyhow!("Request error: {} for ids: {}", e, ids))?;

        if !response.status().is_success() {
            return Err(anyhow!("HTTP error: {} for ids: {}", response.status(), ids));
        }

        let text = response.text().await?;
        let data: HashMap<String, SimplePrice> = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", ids, e))?;

        let mut quotes = HashMap::new();
        for (id, price) in data {
            let Some(owners) = symbols_by_id.get(&id) else {
                debug!("Ignoring unrequested id {}", id);
                continue;
            };
            let quote = PriceQuote::from(price);
            for symbol in owners {
                quotes.insert((*symbol).clone(), quote.clone());
            }
        }
        debug!("Received {} of {} prices", quotes.len(), symbols.len());
        Ok(quotes)
    }
}
