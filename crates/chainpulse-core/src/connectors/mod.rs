//! Provider adapters: CoinGecko, DefiLlama, Velo.

pub mod coingecko;
pub mod defillama;
pub mod velo;

pub use coingecko::CoingeckoConnector;
pub use defillama::DefillamaConnector;
pub use velo::VeloConnector;
