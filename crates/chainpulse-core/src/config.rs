//! Static configuration threaded through component constructors.
//!
//! Nothing in the core reads ambient global state: endpoints, credentials,
//! quotas, TTLs, retry/breaker tuning, and scoring weights all arrive here
//! once at startup and are immutable afterwards.

use std::collections::HashMap;
use std::time::Duration;

use crate::http::HttpAuth;
use crate::ProviderId;

/// One external provider: identity, endpoint, auth, and declared limits.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub id: ProviderId,
    pub base_url: String,
    /// Secondary host for providers that split endpoints (DefiLlama yields).
    pub alt_base_url: Option<String>,
    pub auth: HttpAuth,
    /// Declared rate ceiling: `quota_limit` requests per `quota_window`.
    pub quota_limit: u32,
    pub quota_window: Duration,
    /// Per-attempt SLA timeout for one network call.
    pub sla_timeout: Duration,
    /// Total budget for one fetch including all retries and backoff.
    pub total_budget: Duration,
}

impl ProviderConfig {
    pub fn coingecko(api_key: impl Into<String>) -> Self {
        Self {
            id: ProviderId::Coingecko,
            base_url: String::from("https://pro-api.coingecko.com/api/v3"),
            alt_base_url: None,
            auth: HttpAuth::ApiKeyHeader {
                name: String::from("x-cg-pro-api-key"),
                value: api_key.into(),
            },
            quota_limit: 500,
            quota_window: Duration::from_secs(60),
            sla_timeout: Duration::from_secs(15),
            total_budget: Duration::from_secs(15),
        }
    }

    pub fn defillama() -> Self {
        Self {
            id: ProviderId::Defillama,
            base_url: String::from("https://api.llama.fi"),
            alt_base_url: Some(String::from("https://yields.llama.fi")),
            auth: HttpAuth::None,
            quota_limit: 300,
            quota_window: Duration::from_secs(60),
            sla_timeout: Duration::from_secs(15),
            total_budget: Duration::from_secs(15),
        }
    }

    pub fn velo(api_key: impl Into<String>) -> Self {
        Self {
            id: ProviderId::Velo,
            base_url: String::from("https://api.velo.xyz/api/v1"),
            alt_base_url: None,
            // Velo uses HTTP Basic with the literal user "api".
            auth: HttpAuth::Basic {
                username: String::from("api"),
                password: api_key.into(),
            },
            quota_limit: 120,
            quota_window: Duration::from_secs(60),
            sla_timeout: Duration::from_secs(15),
            total_budget: Duration::from_secs(15),
        }
    }
}

/// Retry policy: attempt count plus an exponential backoff schedule.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
    /// Randomized +/- 50% jitter on each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            factor: 2.0,
            max_delay: Duration::from_secs(3),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Delay before retry `attempt` (0-based), jittered when configured.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scale = self.factor.powi(attempt as i32);
        let seconds = self.base_delay.as_secs_f64() * scale;
        let capped = seconds.min(self.max_delay.as_secs_f64());
        let mut delay = Duration::from_secs_f64(capped);

        if self.jitter {
            let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
            if jitter_ms > 0 {
                let offset = fastrand::u64(0..=(jitter_ms * 2));
                let total_ms = delay.as_millis() as i64 + (offset as i64 - jitter_ms as i64);
                delay = Duration::from_millis(total_ms.max(0) as u64);
            }
        }

        delay
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Open after this many consecutive failures.
    pub consecutive_threshold: u32,
    /// Sliding window length for the ratio rule.
    pub window_size: usize,
    /// Open when at least this fraction of the window failed.
    pub failure_ratio: f64,
    /// Cooldown before an open breaker admits a half-open probe.
    pub open_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            consecutive_threshold: 5,
            window_size: 10,
            failure_ratio: 0.5,
            open_cooldown: Duration::from_secs(30),
        }
    }
}

/// Cache TTLs per data class plus the L1 size bound.
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Fast-moving data: prices, volumes, derivatives.
    pub fast_ttl: Duration,
    /// Slow-moving data: protocol metadata, categories, yields.
    pub slow_ttl: Duration,
    pub l1_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fast_ttl: Duration::from_secs(60),
            slow_ttl: Duration::from_secs(300),
            l1_capacity: 256,
        }
    }
}

/// Aggregation fan-out limits.
#[derive(Debug, Clone, Copy)]
pub struct AggregationConfig {
    /// Upper bound on one analysis' data collection.
    pub deadline: Duration,
    /// Bound on concurrent outbound connector calls.
    pub worker_pool_size: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(10),
            worker_pool_size: 8,
        }
    }
}

/// Fixed weights for the risk/regime composite. Redistribution over present
/// factors happens at scoring time; these never change at runtime.
#[derive(Debug, Clone, Copy)]
pub struct RiskWeights {
    pub market_breadth: f64,
    pub dominance_trend: f64,
    pub tvl_momentum: f64,
    pub derivatives_positioning: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            market_breadth: 0.30,
            dominance_trend: 0.20,
            tvl_momentum: 0.25,
            derivatives_positioning: 0.25,
        }
    }
}

/// Thresholds for dip/leverage-reset detection and entry laddering.
#[derive(Debug, Clone, Copy)]
pub struct DipConfig {
    /// Minimum open-interest percentile drop to call a leverage reset.
    pub min_oi_drop_pct: f64,
    /// 24h move must stay within this band to count as stabilized.
    pub max_abs_change_24h: f64,
    /// Minimum 7d drawdown for the asset to qualify as a dip at all.
    pub min_drawdown_7d: f64,
    /// Ladder rungs between current price and the maximum discount.
    pub ladder_rungs: usize,
    /// Deepest rung as a fraction below current price.
    pub max_discount: f64,
}

impl Default for DipConfig {
    fn default() -> Self {
        Self {
            min_oi_drop_pct: 20.0,
            max_abs_change_24h: 3.0,
            min_drawdown_7d: 5.0,
            ladder_rungs: 4,
            max_discount: 0.20,
        }
    }
}

/// Yield ranking penalties and the hard liquidity floor.
#[derive(Debug, Clone, Copy)]
pub struct YieldConfig {
    /// Pools below this TVL are excluded outright, never scored.
    pub min_tvl_usd: f64,
    /// Penalty weight on protocol TVL concentration (0..1 share).
    pub concentration_penalty: f64,
    /// Penalty weight on historical yield variance (sigma).
    pub variance_penalty: f64,
    /// APY above this level is flagged as likely unsustainable.
    pub red_flag_apy: f64,
}

impl Default for YieldConfig {
    fn default() -> Self {
        Self {
            min_tvl_usd: 1_000_000.0,
            concentration_penalty: 8.0,
            variance_penalty: 5.0,
            red_flag_apy: 50.0,
        }
    }
}

/// Screen thresholds for outperformer and micro-cap filters.
#[derive(Debug, Clone, Copy)]
pub struct ScreenConfig {
    /// Market cap ceiling for micro-cap candidates.
    pub micro_cap_ceiling: f64,
    /// 24h volume floor applied to both screens.
    pub min_volume_24h: f64,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            micro_cap_ceiling: 100_000_000.0,
            min_volume_24h: 1_000_000.0,
        }
    }
}

/// All scoring configuration in one place.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringConfig {
    pub risk_weights: RiskWeights,
    pub dip: DipConfig,
    pub yields: YieldConfig,
    pub screens: ScreenConfig,
}

/// Complete static configuration for the aggregation core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub providers: HashMap<ProviderId, ProviderConfig>,
    pub retry: RetryConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub aggregation: AggregationConfig,
    pub scoring: ScoringConfig,
}

impl CoreConfig {
    /// Production defaults with the given provider credentials.
    pub fn with_keys(coingecko_key: impl Into<String>, velo_key: impl Into<String>) -> Self {
        let providers = [
            ProviderConfig::coingecko(coingecko_key),
            ProviderConfig::defillama(),
            ProviderConfig::velo(velo_key),
        ]
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

        Self {
            providers,
            retry: RetryConfig::default(),
            breaker: BreakerConfig::default(),
            cache: CacheConfig::default(),
            aggregation: AggregationConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }

    pub fn provider(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(&id)
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::with_keys("", "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let retry = RetryConfig {
            max_retries: 4,
            base_delay: Duration::from_millis(100),
            factor: 2.0,
            max_delay: Duration::from_secs(1),
            jitter: false,
        };

        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_secs(1));
    }

    #[test]
    fn jittered_delay_stays_within_half_band() {
        let retry = RetryConfig {
            jitter: true,
            base_delay: Duration::from_millis(200),
            factor: 2.0,
            max_delay: Duration::from_secs(3),
            max_retries: 3,
        };

        for _ in 0..20 {
            let delay = retry.delay_for_attempt(1).as_millis() as f64;
            assert!((196.0..=604.0).contains(&delay), "delay {delay}ms out of band");
        }
    }

    #[test]
    fn default_config_registers_all_providers() {
        let config = CoreConfig::with_keys("cg-key", "velo-key");
        for provider in ProviderId::ALL {
            assert!(config.provider(provider).is_some(), "{provider} missing");
        }

        let velo = config.provider(ProviderId::Velo).expect("velo present");
        assert!(matches!(velo.auth, HttpAuth::Basic { .. }));
    }

    #[test]
    fn risk_weights_sum_to_one() {
        let w = RiskWeights::default();
        let sum = w.market_breadth + w.dominance_trend + w.tvl_momentum + w.derivatives_positioning;
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
