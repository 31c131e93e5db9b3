//! Fan-out data collection for one analysis.
//!
//! Each analysis kind maps to a fixed plan of `(provider, query)` fetches.
//! The plan runs concurrently under one aggregation deadline; providers that
//! fail or miss the deadline leave an empty slot rather than failing the
//! bundle. Confidence is not decided here, it is derived later from what
//! each slot actually holds.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::debug;

use crate::config::CoreConfig;
use crate::domain::{now_ms, AnalysisBundle, AnalysisKind, ProviderSlot};
use crate::executor::FetchExecutor;
use crate::query::{FetchKey, QueryKind};
use crate::ProviderId;

/// Listing depth for screens that rank the broad market.
const SCREEN_DEPTH: usize = 100;
/// Listing depth for the risk composite's breadth factor.
const BREADTH_DEPTH: usize = 50;
/// Listing depth for the micro-cap screen, deep enough to reach small caps.
const MICRO_CAP_DEPTH: usize = 250;

pub struct Aggregator {
    executor: Arc<FetchExecutor>,
    config: CoreConfig,
}

impl Aggregator {
    pub fn new(executor: Arc<FetchExecutor>, config: CoreConfig) -> Self {
        Self { executor, config }
    }

    /// The fetch plan backing one analysis kind.
    pub fn plan(kind: AnalysisKind) -> Vec<FetchKey> {
        use ProviderId::*;
        use QueryKind::*;

        match kind {
            AnalysisKind::RiskRegime => vec![
                FetchKey::new(Coingecko, GlobalMarket),
                FetchKey::new(Coingecko, TopAssets { limit: BREADTH_DEPTH }),
                FetchKey::new(Defillama, ProtocolTvls),
                FetchKey::new(Velo, DerivativesSnapshot),
            ],
            AnalysisKind::SectorRotation => vec![FetchKey::new(Coingecko, Categories)],
            AnalysisKind::DipBuyer => vec![
                FetchKey::new(Coingecko, TopAssets { limit: SCREEN_DEPTH }),
                FetchKey::new(Velo, DerivativesSnapshot),
            ],
            AnalysisKind::YieldRanking => vec![
                FetchKey::new(Defillama, YieldPools),
                FetchKey::new(Defillama, ProtocolTvls),
            ],
            AnalysisKind::Outperformers => {
                vec![FetchKey::new(Coingecko, TopAssets { limit: SCREEN_DEPTH })]
            }
            AnalysisKind::MicroCap => {
                vec![FetchKey::new(Coingecko, TopAssets { limit: MICRO_CAP_DEPTH })]
            }
        }
    }

    /// Collect the bundle for `kind`, degrading instead of failing.
    ///
    /// `caller_deadline` can only tighten the configured aggregation
    /// deadline, never extend it.
    pub async fn collect(
        &self,
        kind: AnalysisKind,
        caller_deadline: Duration,
    ) -> AnalysisBundle {
        let plan = Self::plan(kind);
        let budget = caller_deadline.min(self.config.aggregation.deadline);
        let deadline = Instant::now() + budget;

        let mut slots: BTreeMap<ProviderId, ProviderSlot> = BTreeMap::new();
        for key in &plan {
            let slot = slots
                .entry(key.provider)
                .or_insert_with(|| ProviderSlot::missing(0));
            slot.expected_queries += 1;
            let ttl_ms = key.data_class().ttl(&self.config.cache).as_millis() as i64;
            slot.max_age_ms = slot.max_age_ms.max(ttl_ms);
        }

        let mut tasks = JoinSet::new();
        for key in plan {
            let executor = Arc::clone(&self.executor);
            tasks.spawn(async move {
                let result = executor.fetch(&key, deadline).await;
                (key, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let Ok((key, result)) = joined else {
                // A panicked fetch task degrades to a missing query.
                continue;
            };
            match result {
                Ok(records) => {
                    let slot = slots
                        .entry(key.provider)
                        .or_insert_with(|| ProviderSlot::missing(1));
                    if !records.is_empty() {
                        slot.fulfilled_queries += 1;
                        slot.records.extend(records.iter().cloned());
                    }
                }
                Err(error) => {
                    debug!(%key, %error, "query left unfulfilled in bundle");
                }
            }
        }

        AnalysisBundle {
            kind,
            slots,
            collected_at_ms: now_ms(),
        }
    }
}
