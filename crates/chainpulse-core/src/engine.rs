//! Public entry point: the analytics core facade.
//!
//! Wires connectors, gates, cache, and aggregator together and exposes one
//! operation per analysis kind through [`AnalyticsCore::run_analysis`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::aggregator::Aggregator;
use crate::cache::{EntryStore, FjallStore, TieredCache};
use crate::config::CoreConfig;
use crate::connector::Connector;
use crate::connectors::{CoingeckoConnector, DefillamaConnector, VeloConnector};
use crate::domain::{AnalysisKind, CompositeScore};
use crate::error::{CoreError, ValidationError};
use crate::events::{CoreEvent, EventBus};
use crate::executor::FetchExecutor;
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::ProviderId;

/// Caller-tunable analysis parameters.
#[derive(Debug, Clone)]
pub struct AnalysisParams {
    /// Ranking/listing depth of the result detail.
    pub top_n: usize,
    /// Benchmark asset id for the outperformer screen.
    pub benchmark: String,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            top_n: 10,
            benchmark: String::from("ethereum"),
        }
    }
}

impl AnalysisParams {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.top_n == 0 {
            return Err(ValidationError::NonPositiveParam { param: "top_n" });
        }
        if self.benchmark.trim().is_empty() {
            return Err(ValidationError::EmptyBenchmark);
        }
        Ok(())
    }
}

/// The aggregation core: resilient fetching plus composite scoring.
pub struct AnalyticsCore {
    aggregator: Aggregator,
    config: CoreConfig,
    events: EventBus,
}

impl AnalyticsCore {
    /// Build a core over explicit connectors and a cache store. The seam
    /// tests use to swap in scripted providers.
    pub fn new(
        config: CoreConfig,
        connectors: Vec<Arc<dyn Connector>>,
        store: Arc<dyn EntryStore>,
    ) -> Self {
        let events = EventBus::new();
        let cache = Arc::new(TieredCache::new(config.cache.l1_capacity, store));
        let executor = Arc::new(FetchExecutor::new(
            config.clone(),
            connectors,
            cache,
            events.clone(),
        ));
        Self {
            aggregator: Aggregator::new(executor, config.clone()),
            config,
            events,
        }
    }

    /// Build a core over the three real providers on a shared transport.
    pub fn with_transport(
        config: CoreConfig,
        http: Arc<dyn HttpClient>,
        store: Arc<dyn EntryStore>,
    ) -> Self {
        let mut connectors: Vec<Arc<dyn Connector>> = Vec::new();
        if let Some(provider) = config.provider(ProviderId::Coingecko) {
            connectors.push(Arc::new(CoingeckoConnector::new(
                provider.clone(),
                Arc::clone(&http),
            )));
        }
        if let Some(provider) = config.provider(ProviderId::Defillama) {
            connectors.push(Arc::new(DefillamaConnector::new(
                provider.clone(),
                Arc::clone(&http),
            )));
        }
        if let Some(provider) = config.provider(ProviderId::Velo) {
            connectors.push(Arc::new(VeloConnector::new(provider.clone(), http)));
        }
        Self::new(config, connectors, store)
    }

    /// Production constructor: reqwest transport, fjall-backed L2 cache at
    /// `data_dir`.
    pub fn open(config: CoreConfig, data_dir: &Path) -> Result<Self, fjall::Error> {
        let store = Arc::new(FjallStore::open(data_dir)?);
        Ok(Self::with_transport(
            config,
            Arc::new(ReqwestHttpClient::new()),
            store,
        ))
    }

    /// Lifecycle events: breaker transitions and stale fallbacks.
    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Run one analysis end to end within `deadline`.
    ///
    /// Partial provider failure degrades the result's confidence; only a
    /// bundle with no usable data at all is an error.
    pub async fn run_analysis(
        &self,
        kind: AnalysisKind,
        params: &AnalysisParams,
        deadline: Duration,
    ) -> Result<CompositeScore, CoreError> {
        params.validate()?;

        let bundle = self.aggregator.collect(kind, deadline).await;
        if bundle.is_empty() {
            return Err(CoreError::NoData);
        }

        let scoring = &self.config.scoring;
        let score = match kind {
            AnalysisKind::RiskRegime => crate::analysis::risk::score(&bundle, scoring),
            AnalysisKind::SectorRotation => {
                crate::analysis::sector::score(&bundle, params.top_n)
            }
            AnalysisKind::DipBuyer => crate::analysis::dip::score(&bundle, &scoring.dip),
            AnalysisKind::YieldRanking => {
                crate::analysis::yield_rank::score(&bundle, &scoring.yields, params.top_n)
            }
            AnalysisKind::Outperformers => crate::analysis::screens::outperformers(
                &bundle,
                &scoring.screens,
                &params.benchmark,
                params.top_n,
            ),
            AnalysisKind::MicroCap => {
                crate::analysis::screens::micro_cap(&bundle, &scoring.screens, params.top_n)
            }
        };

        score.ok_or(CoreError::NoData)
    }
}
