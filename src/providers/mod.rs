pub mod coingecko;
pub mod util;

pub use coingecko::CoinGeckoSource;
