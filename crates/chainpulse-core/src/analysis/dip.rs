//! Tactical dip detection with laddered entries.
//!
//! A candidate must show all three signs of a leverage reset: a deep
//! open-interest drawdown, a stabilized 24h price, and a meaningful weekly
//! drawdown. Market rows (CoinGecko, keyed by asset id) join derivatives
//! rows (Velo, keyed by coin ticker) through the asset's symbol.

use std::collections::BTreeMap;

use crate::analysis::{bundle_confidence, clamp_score};
use crate::config::DipConfig;
use crate::domain::{
    AnalysisBundle, AnalysisDetail, AnalysisKind, CompositeScore, DipCandidate,
    FactorContribution, LadderRung, NormalizedRecord,
};
use crate::ProviderId;

pub fn score(bundle: &AnalysisBundle, config: &DipConfig) -> Option<CompositeScore> {
    let markets = bundle.records(ProviderId::Coingecko);
    let derivatives = bundle.records(ProviderId::Velo);
    if markets.is_empty() && derivatives.is_empty() {
        return None;
    }

    let derivatives_by_coin: BTreeMap<&str, &NormalizedRecord> = derivatives
        .iter()
        .map(|record| (record.entity.as_str(), record))
        .collect();

    let mut candidates = Vec::new();
    for market in markets {
        let Some(symbol) = market.text("symbol") else {
            continue;
        };
        let Some(deriv) = derivatives_by_coin.get(symbol) else {
            continue;
        };
        let (Some(price), Some(change_24h), Some(change_7d), Some(oi_drop)) = (
            market.number("price"),
            market.number("change_24h"),
            market.number("change_7d"),
            deriv.number("oi_drop_pct"),
        ) else {
            continue;
        };

        let reset = oi_drop >= config.min_oi_drop_pct;
        let stabilized = change_24h.abs() <= config.max_abs_change_24h;
        let drawn_down = change_7d <= -config.min_drawdown_7d;
        if !(reset && stabilized && drawn_down) {
            continue;
        }

        let reset_score = clamp_score(oi_drop + (-change_7d));
        candidates.push(DipCandidate {
            asset: market.entity.clone(),
            current_price: price,
            change_7d,
            oi_drop_pct: oi_drop,
            reset_score,
            ladder: build_ladder(price, config),
        });
    }

    candidates.sort_by(|a, b| {
        b.reset_score
            .total_cmp(&a.reset_score)
            .then_with(|| a.asset.cmp(&b.asset))
    });

    let score_value = candidates
        .first()
        .map(|c| c.reset_score)
        .unwrap_or(0.0);

    let mut factors = BTreeMap::new();
    factors.insert(
        String::from("best_reset"),
        FactorContribution {
            weight: 1.0,
            value: score_value,
            contribution: score_value,
        },
    );

    Some(CompositeScore {
        kind: AnalysisKind::DipBuyer,
        score: score_value,
        label: dip_label(&candidates, score_value).to_owned(),
        factors,
        confidence: bundle_confidence(bundle, &[ProviderId::Coingecko, ProviderId::Velo]),
        detail: AnalysisDetail::DipBuyer { candidates },
    })
}

/// Geometric entry ladder from current price down to the max discount.
///
/// The rung ratio solves `ratio^rungs = 1 - max_discount`, so rungs are
/// evenly spaced in log-price. Allocation pyramids: deeper rungs take a
/// larger share.
fn build_ladder(price: f64, config: &DipConfig) -> Vec<LadderRung> {
    let rungs = config.ladder_rungs.max(1);
    let ratio = (1.0 - config.max_discount).powf(1.0 / rungs as f64);
    let allocation_denominator: f64 = (1..=rungs).map(|i| i as f64).sum();

    (1..=rungs)
        .map(|level| {
            let multiplier = ratio.powi(level as i32);
            LadderRung {
                level,
                entry_price: price * multiplier,
                allocation_pct: level as f64 / allocation_denominator * 100.0,
                discount_pct: (1.0 - multiplier) * 100.0,
            }
        })
        .collect()
}

fn dip_label(candidates: &[DipCandidate], score: f64) -> &'static str {
    if candidates.is_empty() {
        "no-setup"
    } else if score >= 70.0 {
        "strong-reset"
    } else {
        "actionable"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderSlot;

    fn market(id: &str, symbol: &str, price: f64, c24: f64, c7: f64) -> NormalizedRecord {
        NormalizedRecord::new(id, ProviderId::Coingecko)
            .expect("valid")
            .with_fetched_at(900)
            .with_text("symbol", symbol)
            .with_number("price", price)
            .expect("finite")
            .with_number("change_24h", c24)
            .expect("finite")
            .with_number("change_7d", c7)
            .expect("finite")
    }

    fn deriv(coin: &str, oi_drop: f64) -> NormalizedRecord {
        NormalizedRecord::new(coin, ProviderId::Velo)
            .expect("valid")
            .with_fetched_at(900)
            .with_number("oi_drop_pct", oi_drop)
            .expect("finite")
    }

    fn bundle(
        markets: Vec<NormalizedRecord>,
        derivatives: Vec<NormalizedRecord>,
    ) -> AnalysisBundle {
        let slot = |records: Vec<NormalizedRecord>| ProviderSlot {
            records,
            expected_queries: 1,
            fulfilled_queries: 1,
            max_age_ms: 60_000,
        };
        AnalysisBundle {
            kind: AnalysisKind::DipBuyer,
            slots: [
                (ProviderId::Coingecko, slot(markets)),
                (ProviderId::Velo, slot(derivatives)),
            ]
            .into_iter()
            .collect(),
            collected_at_ms: 1_000,
        }
    }

    #[test]
    fn flags_only_assets_meeting_all_three_criteria() {
        let bundle = bundle(
            vec![
                // Reset, stabilized, and drawn down: qualifies.
                market("solana", "sol", 140.0, 1.0, -12.0),
                // OI drop too small.
                market("bitcoin", "btc", 64_000.0, 0.5, -8.0),
                // Still moving too fast on the day.
                market("ethereum", "eth", 2_600.0, 5.0, -10.0),
                // No meaningful weekly drawdown.
                market("cardano", "ada", 0.5, 0.2, -1.0),
            ],
            vec![
                deriv("sol", 35.0),
                deriv("btc", 10.0),
                deriv("eth", 30.0),
                deriv("ada", 25.0),
            ],
        );

        let result = score(&bundle, &DipConfig::default()).expect("scored");
        let AnalysisDetail::DipBuyer { candidates } = &result.detail else {
            panic!("wrong detail");
        };
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].asset, "solana");
        assert!((candidates[0].reset_score - 47.0).abs() < 1e-9);
    }

    #[test]
    fn ladder_is_geometric_down_to_the_max_discount() {
        let config = DipConfig::default();
        let ladder = build_ladder(100.0, &config);

        assert_eq!(ladder.len(), config.ladder_rungs);
        // Deepest rung lands exactly on the configured discount.
        let deepest = ladder.last().expect("non-empty");
        assert!((deepest.entry_price - 80.0).abs() < 1e-9);
        assert!((deepest.discount_pct - 20.0).abs() < 1e-9);

        // Prices strictly decrease and allocations sum to 100.
        for pair in ladder.windows(2) {
            assert!(pair[1].entry_price < pair[0].entry_price);
        }
        let total_allocation: f64 = ladder.iter().map(|r| r.allocation_pct).sum();
        assert!((total_allocation - 100.0).abs() < 1e-9);
        // Pyramiding: deeper rungs take more.
        assert!(deepest.allocation_pct > ladder[0].allocation_pct);
    }

    #[test]
    fn no_candidates_scores_zero_with_no_setup_label() {
        let bundle = bundle(
            vec![market("bitcoin", "btc", 64_000.0, 0.5, -1.0)],
            vec![deriv("btc", 5.0)],
        );

        let result = score(&bundle, &DipConfig::default()).expect("scored");
        assert_eq!(result.score, 0.0);
        assert_eq!(result.label, "no-setup");
    }

    #[test]
    fn candidates_order_by_reset_score_then_asset() {
        let bundle = bundle(
            vec![
                market("solana", "sol", 140.0, 1.0, -10.0),
                market("avalanche-2", "avax", 30.0, 1.0, -10.0),
            ],
            vec![deriv("sol", 30.0), deriv("avax", 30.0)],
        );

        let result = score(&bundle, &DipConfig::default()).expect("scored");
        let AnalysisDetail::DipBuyer { candidates } = &result.detail else {
            panic!("wrong detail");
        };
        // Equal reset scores break on asset id.
        assert_eq!(candidates[0].asset, "avalanche-2");
        assert_eq!(candidates[1].asset, "solana");
    }
}
