use std::fmt::{Display, Formatter};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::CacheConfig;
use crate::ProviderId;

/// TTL class of a logical query's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataClass {
    /// Prices, volumes, derivatives positioning.
    Fast,
    /// Protocol metadata, categories, yield listings.
    Slow,
}

impl DataClass {
    pub fn ttl(self, cache: &CacheConfig) -> Duration {
        match self {
            Self::Fast => cache.fast_ttl,
            Self::Slow => cache.slow_ttl,
        }
    }
}

/// Logical, provider-facing query shapes the aggregator can plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Global market snapshot: total cap, volume, BTC dominance.
    GlobalMarket,
    /// Top assets by market cap with price/volume/return fields.
    TopAssets { limit: usize },
    /// Sector/category listing with momentum fields.
    Categories,
    /// Protocol TVL listing.
    ProtocolTvls,
    /// Yield pool listing with APY, TVL, and variance.
    YieldPools,
    /// Derivatives positioning snapshot (open interest, funding).
    DerivativesSnapshot,
}

impl QueryKind {
    pub const fn data_class(&self) -> DataClass {
        match self {
            Self::GlobalMarket | Self::TopAssets { .. } | Self::DerivativesSnapshot => {
                DataClass::Fast
            }
            Self::Categories | Self::ProtocolTvls | Self::YieldPools => DataClass::Slow,
        }
    }

    /// Stable signature usable in cache keys and single-flight maps.
    pub fn signature(&self) -> String {
        match self {
            Self::GlobalMarket => String::from("global_market"),
            Self::TopAssets { limit } => format!("top_assets:{limit}"),
            Self::Categories => String::from("categories"),
            Self::ProtocolTvls => String::from("protocol_tvls"),
            Self::YieldPools => String::from("yield_pools"),
            Self::DerivativesSnapshot => String::from("derivatives_snapshot"),
        }
    }
}

/// Content-addressable key for one `(provider, logical query)` fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchKey {
    pub provider: ProviderId,
    pub query: QueryKind,
}

impl FetchKey {
    pub fn new(provider: ProviderId, query: QueryKind) -> Self {
        Self { provider, query }
    }

    pub fn signature(&self) -> String {
        format!("{}/{}", self.provider, self.query.signature())
    }

    pub const fn data_class(&self) -> DataClass {
        self.query.data_class()
    }
}

impl Display for FetchKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.signature())
    }
}
