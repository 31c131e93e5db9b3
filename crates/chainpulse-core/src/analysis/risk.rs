//! Market risk/regime composite.
//!
//! Four sub-factors, each normalized into [0, 100] where higher means more
//! risk appetite: breadth of positive weekly returns, BTC dominance trend
//! (rising dominance reads as defensive rotation), aggregate DeFi TVL
//! momentum, and derivatives positioning (funding tilt less open-interest
//! unwind). Absent factors are excluded and their weight is redistributed
//! proportionally over the rest.

use std::collections::BTreeMap;

use crate::analysis::{bundle_confidence, clamp_score, mean_field};
use crate::config::ScoringConfig;
use crate::domain::{
    AnalysisBundle, AnalysisDetail, AnalysisKind, CompositeScore, FactorContribution,
};
use crate::ProviderId;

const RISK_ON_FLOOR: f64 = 70.0;
const NEUTRAL_FLOOR: f64 = 40.0;
const TOTAL_FACTORS: usize = 4;

pub fn score(bundle: &AnalysisBundle, config: &ScoringConfig) -> Option<CompositeScore> {
    let weights = &config.risk_weights;
    let mut raw: Vec<(&'static str, f64, f64)> = Vec::with_capacity(4);

    if let Some(value) = market_breadth(bundle) {
        raw.push(("market_breadth", weights.market_breadth, value));
    }
    if let Some(value) = dominance_trend(bundle) {
        raw.push(("dominance_trend", weights.dominance_trend, value));
    }
    if let Some(value) = tvl_momentum(bundle) {
        raw.push(("tvl_momentum", weights.tvl_momentum, value));
    }
    if let Some(value) = derivatives_positioning(bundle) {
        raw.push(("derivatives_positioning", weights.derivatives_positioning, value));
    }

    if raw.is_empty() {
        return None;
    }

    let weight_sum: f64 = raw.iter().map(|(_, weight, _)| weight).sum();
    let mut factors = BTreeMap::new();
    let mut score = 0.0;
    for (name, weight, value) in &raw {
        let weight = weight / weight_sum;
        let contribution = weight * value;
        score += contribution;
        factors.insert(
            (*name).to_owned(),
            FactorContribution {
                weight,
                value: *value,
                contribution,
            },
        );
    }
    let score = clamp_score(score);

    let mut confidence = bundle_confidence(
        bundle,
        &[ProviderId::Coingecko, ProviderId::Defillama, ProviderId::Velo],
    );
    if raw.len() < TOTAL_FACTORS {
        confidence = confidence.min(crate::domain::Confidence::Partial);
    }

    let label = regime_label(score);
    Some(CompositeScore {
        kind: AnalysisKind::RiskRegime,
        score,
        label: label.to_owned(),
        factors,
        confidence,
        detail: AnalysisDetail::RiskRegime {
            regime: label.to_owned(),
        },
    })
}

fn regime_label(score: f64) -> &'static str {
    if score >= RISK_ON_FLOOR {
        "risk-on"
    } else if score >= NEUTRAL_FLOOR {
        "neutral"
    } else {
        "risk-off"
    }
}

/// Share of ranked assets with a positive weekly return, as 0..=100.
fn market_breadth(bundle: &AnalysisBundle) -> Option<f64> {
    let changes: Vec<f64> = bundle
        .records(ProviderId::Coingecko)
        .iter()
        .filter(|r| r.entity != "global")
        .filter_map(|r| r.number("change_7d"))
        .collect();
    if changes.is_empty() {
        return None;
    }
    let positive = changes.iter().filter(|c| **c > 0.0).count();
    Some(positive as f64 / changes.len() as f64 * 100.0)
}

/// BTC dominance trend, inverted: rising dominance lowers the factor.
///
/// Dominance change is approximated as BTC's 24h move relative to the whole
/// market's 24h move.
fn dominance_trend(bundle: &AnalysisBundle) -> Option<f64> {
    let records = bundle.records(ProviderId::Coingecko);
    let market_change = records
        .iter()
        .find(|r| r.entity == "global")?
        .number("market_cap_change_24h")?;
    let btc_change = records
        .iter()
        .find(|r| r.entity == "bitcoin")?
        .number("change_24h")?;

    let dominance_change = btc_change - market_change;
    Some(clamp_score(50.0 - dominance_change * 10.0))
}

/// Aggregate protocol TVL momentum over the trailing week.
fn tvl_momentum(bundle: &AnalysisBundle) -> Option<f64> {
    let mean = mean_field(bundle.records(ProviderId::Defillama), "tvl_change_7d")?;
    Some(clamp_score(50.0 + mean * 2.5))
}

/// Leverage appetite: positive funding raises it, recent open-interest
/// drawdown lowers it.
fn derivatives_positioning(bundle: &AnalysisBundle) -> Option<f64> {
    let records = bundle.records(ProviderId::Velo);
    let funding = mean_field(records, "funding_rate");
    let unwind = mean_field(records, "oi_drop_pct");
    if funding.is_none() && unwind.is_none() {
        return None;
    }

    let tilt = (funding.unwrap_or(0.0) * 100_000.0).clamp(-50.0, 50.0);
    let drag = unwind.unwrap_or(0.0).clamp(0.0, 50.0);
    Some(clamp_score(50.0 + tilt - drag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Confidence, NormalizedRecord, ProviderSlot};

    fn asset(entity: &str, change_7d: f64, change_24h: f64) -> NormalizedRecord {
        NormalizedRecord::new(entity, ProviderId::Coingecko)
            .expect("valid")
            .with_fetched_at(900)
            .with_number("change_7d", change_7d)
            .expect("finite")
            .with_number("change_24h", change_24h)
            .expect("finite")
    }

    fn slot(provider: ProviderId, records: Vec<NormalizedRecord>) -> ProviderSlot {
        ProviderSlot {
            records,
            expected_queries: 1,
            fulfilled_queries: 1,
            max_age_ms: 300_000,
        }
    }

    fn full_bundle() -> AnalysisBundle {
        let global = NormalizedRecord::new("global", ProviderId::Coingecko)
            .expect("valid")
            .with_fetched_at(900)
            .with_number("market_cap_change_24h", 1.0)
            .expect("finite");
        let protocol = NormalizedRecord::new("aave", ProviderId::Defillama)
            .expect("valid")
            .with_fetched_at(900)
            .with_number("tvl_change_7d", 4.0)
            .expect("finite");
        let derivs = NormalizedRecord::new("btc", ProviderId::Velo)
            .expect("valid")
            .with_fetched_at(900)
            .with_number("funding_rate", 0.0001)
            .expect("finite")
            .with_number("oi_drop_pct", 5.0)
            .expect("finite");

        AnalysisBundle {
            kind: AnalysisKind::RiskRegime,
            slots: [
                (
                    ProviderId::Coingecko,
                    slot(
                        ProviderId::Coingecko,
                        vec![
                            global,
                            asset("bitcoin", 5.0, 2.0),
                            asset("ethereum", 3.0, 1.0),
                            asset("solana", -2.0, -1.0),
                            asset("cardano", 1.0, 0.5),
                        ],
                    ),
                ),
                (ProviderId::Defillama, slot(ProviderId::Defillama, vec![protocol])),
                (ProviderId::Velo, slot(ProviderId::Velo, vec![derivs])),
            ]
            .into_iter()
            .collect(),
            collected_at_ms: 1_000,
        }
    }

    #[test]
    fn full_bundle_scores_with_all_four_factors() {
        let result = score(&full_bundle(), &ScoringConfig::default()).expect("scored");

        assert_eq!(result.factors.len(), 4);
        assert_eq!(result.confidence, Confidence::Full);
        assert!((0.0..=100.0).contains(&result.score));

        let weight_sum: f64 = result.factors.values().map(|f| f.weight).sum();
        assert!((weight_sum - 1.0).abs() < 1e-9);

        // breadth: 3 of 4 assets positive on the week.
        let breadth = &result.factors["market_breadth"];
        assert!((breadth.value - 75.0).abs() < 1e-9);
    }

    #[test]
    fn missing_provider_redistributes_weight_and_degrades_confidence() {
        let mut bundle = full_bundle();
        bundle.slots.remove(&ProviderId::Velo);

        let result = score(&bundle, &ScoringConfig::default()).expect("scored");
        assert_eq!(result.factors.len(), 3);
        assert_eq!(result.confidence, Confidence::Partial);

        let weight_sum: f64 = result.factors.values().map(|f| f.weight).sum();
        assert!((weight_sum - 1.0).abs() < 1e-9, "weights must renormalize");
        assert!((0.0..=100.0).contains(&result.score));
    }

    #[test]
    fn single_factor_takes_all_the_weight() {
        let mut bundle = full_bundle();
        bundle.slots.remove(&ProviderId::Velo);
        bundle.slots.remove(&ProviderId::Coingecko);

        let result = score(&bundle, &ScoringConfig::default()).expect("scored");
        assert_eq!(result.factors.len(), 1);
        let tvl = &result.factors["tvl_momentum"];
        assert!((tvl.weight - 1.0).abs() < 1e-9);
        assert!((result.score - tvl.value).abs() < 1e-9);
    }

    #[test]
    fn empty_bundle_yields_no_score() {
        let bundle = AnalysisBundle::new(AnalysisKind::RiskRegime, 1_000);
        assert!(score(&bundle, &ScoringConfig::default()).is_none());
    }

    #[test]
    fn rescoring_the_same_bundle_is_idempotent() {
        let bundle = full_bundle();
        let config = ScoringConfig::default();

        let first = score(&bundle, &config).expect("scored");
        let second = score(&bundle, &config).expect("scored");
        assert_eq!(first, second);
    }

    #[test]
    fn labels_cover_the_three_regimes() {
        assert_eq!(regime_label(85.0), "risk-on");
        assert_eq!(regime_label(55.0), "neutral");
        assert_eq!(regime_label(10.0), "risk-off");
    }
}
