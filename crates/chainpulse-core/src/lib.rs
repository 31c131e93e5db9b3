//! # Chainpulse Core
//!
//! Resilient multi-source aggregation core for crypto market analytics.
//!
//! ## Overview
//!
//! This crate pulls market, DeFi, and derivatives data from three
//! rate-limited providers and condenses it into deterministic composite
//! scores:
//!
//! - **Provider connectors** for CoinGecko, DefiLlama, and Velo behind one
//!   normalization contract
//! - **Resilient fetch executor**: single-flight coalescing, token-bucket
//!   rate limiting, circuit breaking, retry with backoff
//! - **Two-tier cache** (in-process + persistent) with generation-checked
//!   writes and stale fallback
//! - **Aggregator** fanning out per-analysis fetch plans under a deadline
//! - **Composite scoring**: six pure analyses with explicit confidence
//!   tags that degrade instead of failing
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`aggregator`] | Per-analysis fan-out data collection |
//! | [`analysis`] | Pure composite scoring functions |
//! | [`breaker`] | Per-provider circuit breaker |
//! | [`cache`] | Two-tier response cache |
//! | [`config`] | Static configuration |
//! | [`connector`] | Connector contract and failure classification |
//! | [`connectors`] | CoinGecko, DefiLlama, and Velo adapters |
//! | [`domain`] | Normalized records, bundles, scores |
//! | [`engine`] | `AnalyticsCore` facade |
//! | [`error`] | Error taxonomy |
//! | [`events`] | Lossy lifecycle event bus |
//! | [`executor`] | Resilient fetch pipeline |
//! | [`http`] | HTTP transport abstraction |
//! | [`limiter`] | Token-bucket rate limiting |
//! | [`query`] | Logical queries and fetch keys |
//! | [`singleflight`] | In-flight request coalescing |
//! | [`source`] | Provider identifiers |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use chainpulse_core::{AnalysisKind, AnalysisParams, AnalyticsCore, CoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CoreConfig::with_keys(
//!         std::env::var("COINGECKO_API_KEY")?,
//!         std::env::var("VELO_API_KEY")?,
//!     );
//!     let core = AnalyticsCore::open(config, std::path::Path::new("./cache"))?;
//!
//!     let score = core
//!         .run_analysis(
//!             AnalysisKind::RiskRegime,
//!             &AnalysisParams::default(),
//!             Duration::from_secs(10),
//!         )
//!         .await?;
//!     println!("{}: {:.1} ({})", score.kind, score.score, score.label);
//!     Ok(())
//! }
//! ```
//!
//! ## Degradation model
//!
//! Partial provider failure is not an error. Every analysis reports a
//! confidence tag (`Missing < Stale < Partial < Full`) derived from what
//! the bundle actually holds; only a bundle with no usable data at all
//! surfaces as [`CoreError::NoData`].

pub mod aggregator;
pub mod analysis;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod connector;
pub mod connectors;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod http;
pub mod limiter;
pub mod query;
pub mod singleflight;
pub mod source;

// Re-export commonly used types at crate root for convenience

pub use aggregator::Aggregator;
pub use breaker::{CircuitBreaker, CircuitState};
pub use cache::{EntryStore, FjallStore, MemoryStore, StoredEntry, TieredCache};
pub use config::{
    AggregationConfig, BreakerConfig, CacheConfig, CoreConfig, DipConfig, ProviderConfig,
    RetryConfig, RiskWeights, ScoringConfig, ScreenConfig, YieldConfig,
};
pub use connector::Connector;
pub use connectors::{CoingeckoConnector, DefillamaConnector, VeloConnector};
pub use domain::{
    AnalysisBundle, AnalysisDetail, AnalysisKind, CompositeScore, Confidence, DipCandidate,
    FactorContribution, FieldValue, LadderRung, NormalizedRecord, ProviderSlot, RankedPool,
    RankedSector, ScreenedAsset,
};
pub use engine::{AnalysisParams, AnalyticsCore};
pub use error::{CoreError, FetchError, ValidationError};
pub use events::{CoreEvent, EventBus};
pub use executor::FetchExecutor;
pub use http::{
    HttpAuth, HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient,
    StaticHttpClient,
};
pub use limiter::ProviderLimiter;
pub use query::{DataClass, FetchKey, QueryKind};
pub use singleflight::{Flight, FlightGroup};
pub use source::ProviderId;
