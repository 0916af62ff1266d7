use anyhow::{Context, Result};
use directories::ProjectDirs;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

pub const DEFAULT_COINGECKO_URL: &str = "https://api.coingecko.com/api/v3";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RatesConfig {
    /// How long a fetched rate stays fresh.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl RatesConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for RatesConfig {
    fn default() -> Self {
        RatesConfig {
            ttl_secs: default_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoinGeckoProviderConfig {
    pub base_url: String,
    /// Symbol to CoinGecko id overrides, e.g. `EUR: euro-coin`.
    #[serde(default)]
    pub ids: HashMap<String, String>,
}

impl Default for CoinGeckoProviderConfig {
    fn default() -> Self {
        CoinGeckoProviderConfig {
            base_url: DEFAULT_COINGECKO_URL.to_string(),
            ids: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub coingecko: Option<CoinGeckoProviderConfig>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            coingecko: Some(CoinGeckoProviderConfig::default()),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct HoldingSeed {
    pub symbol: String,
    pub amount: Decimal,
    pub cost_basis: Decimal,
}

/// Initial contents for an owner's portfolio, applied once when the
/// portfolio does not exist yet.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccountConfig {
    pub owner: String,
    #[serde(default)]
    pub cash: BTreeMap<String, Decimal>,
    #[serde(default)]
    pub holdings: Vec<HoldingSeed>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Pivot for conversions and the currency portfolios are valued in.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Symbols held as cash balances; everything else is a holding.
    #[serde(default = "default_fiat")]
    pub fiat: Vec<String>,
    #[serde(default)]
    pub rates: RatesConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Cash balances of a portfolio created on first access.
    #[serde(default = "default_cash")]
    pub default_cash: BTreeMap<String, Decimal>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    /// Only configured accounts may send or receive transfers, payments and
    /// remittances.
    #[serde(default)]
    pub known_parties_only: bool,
    pub data_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            currency: default_currency(),
            fiat: default_fiat(),
            rates: RatesConfig::default(),
            providers: ProvidersConfig::default(),
            default_cash: default_cash(),
            accounts: Vec::new(),
            known_parties_only: false,
            data_path: None,
        }
    }
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_fiat() -> Vec<String> {
    vec!["USD".to_string(), "EUR".to_string(), "GBP".to_string()]
}

fn default_cash() -> BTreeMap<String, Decimal> {
    BTreeMap::from([("USD".to_string(), Decimal::from(10_000))])
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "xbridge", "xbridge")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("dev", "xbridge", "xbridge")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.as_ref().display()))?;
        debug!("Successfully loaded config");
        Ok(config)
    }

    /// Upper-cased pivot currency.
    pub fn pivot(&self) -> String {
        self.currency.trim().to_uppercase()
    }

    pub fn validate(&self) -> Result<()> {
        if self.pivot().is_empty() {
            anyhow::bail!("currency cannot be empty");
        }
        if !self.fiat.iter().any(|f| f.trim().eq_ignore_ascii_case(&self.pivot())) {
            anyhow::bail!("currency {} must be listed under fiat", self.pivot());
        }
        if self.rates.fetch_timeout_secs == 0 {
            anyhow::bail!("rates.fetch_timeout_secs must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_config_deserialization() {
        let yaml_str = r#"
currency: "usd"
fiat: [USD, EUR]
rates:
  ttl_secs: 60
providers:
  coingecko:
    base_url: "http://example.com/coingecko"
    ids:
      PEPE: pepe
default_cash:
  USD: 2500
accounts:
  - owner: alice
    cash:
      USD: 20000
    holdings:
      - symbol: BTC
        amount: 0.5
        cost_basis: 35000
  - owner: bob
data_path: /tmp/xbridge
"#;

        let config: AppConfig = serde_yaml::from_str(yaml_str).expect("Failed to deserialize");
        config.validate().unwrap();
        assert_eq!(config.pivot(), "USD");
        assert_eq!(config.fiat, vec!["USD", "EUR"]);
        assert_eq!(config.rates.ttl(), Duration::from_secs(60));
        assert_eq!(config.rates.fetch_timeout(), Duration::from_secs(10));

        let coingecko = config.providers.coingecko.as_ref().unwrap();
        assert_eq!(coingecko.base_url, "http://example.com/coingecko");
        assert_eq!(coingecko.ids.get("PEPE").map(String::as_str), Some("pepe"));

        assert_eq!(config.default_cash.get("USD"), Some(&dec!(2500)));
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.accounts[0].owner, "alice");
        assert_eq!(config.accounts[0].cash.get("USD"), Some(&dec!(20000)));
        assert_eq!(
            config.accounts[0].holdings,
            vec![HoldingSeed {
                symbol: "BTC".to_string(),
                amount: dec!(0.5),
                cost_basis: dec!(35000),
            }]
        );
        assert!(config.accounts[1].cash.is_empty());
        assert!(!config.known_parties_only);
        assert_eq!(
            config.default_data_path().unwrap(),
            PathBuf::from("/tmp/xbridge")
        );
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        config.validate().unwrap();
        assert_eq!(config.currency, "USD");
        assert_eq!(config.fiat, vec!["USD", "EUR", "GBP"]);
        assert_eq!(config.rates.ttl_secs, 300);
        assert_eq!(config.default_cash.get("USD"), Some(&dec!(10000)));
        assert_eq!(
            config.providers.coingecko.unwrap().base_url,
            DEFAULT_COINGECKO_URL
        );
        assert!(config.accounts.is_empty());
    }

    #[test]
    fn test_pivot_must_be_fiat() {
        let config: AppConfig = serde_yaml::from_str("currency: BTC").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must be listed under fiat"));
    }

    #[test]
    fn test_load_from_missing_path_fails() {
        let err = AppConfig::load_from_path("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
