//! Risk-adjusted yield ranking.
//!
//! Pools under the TVL floor are excluded outright, never scored. The rest
//! are ranked by net score: APY minus a concentration penalty (how much of
//! its protocol's TVL sits in this one pool) and a variance penalty on the
//! pool's historical yield sigma. Surviving entries carry red-flag
//! annotations rather than being silently dropped.

use std::collections::BTreeMap;

use crate::analysis::{bundle_confidence, clamp_score};
use crate::config::YieldConfig;
use crate::domain::{
    AnalysisBundle, AnalysisDetail, AnalysisKind, CompositeScore, FactorContribution,
    NormalizedRecord, RankedPool,
};
use crate::ProviderId;

pub fn score(
    bundle: &AnalysisBundle,
    config: &YieldConfig,
    top_n: usize,
) -> Option<CompositeScore> {
    let records = bundle.records(ProviderId::Defillama);

    // Protocol TVLs, for the concentration penalty.
    let protocol_tvls: BTreeMap<&str, f64> = records
        .iter()
        .filter(|r| r.number("tvl").is_some())
        .filter_map(|r| Some((r.entity.as_str(), r.number("tvl")?)))
        .collect();

    let mut entries = Vec::new();
    for pool in records.iter().filter(is_pool) {
        let (Some(apy), Some(tvl_usd)) = (pool.number("apy"), pool.number("tvl_usd")) else {
            continue;
        };
        // Hard liquidity floor: excluded, not penalized.
        if tvl_usd < config.min_tvl_usd {
            continue;
        }

        let project = pool.text("project").unwrap_or("").to_owned();
        let concentration = protocol_tvls
            .get(project.as_str())
            .map(|protocol_tvl| {
                if *protocol_tvl > 0.0 {
                    (tvl_usd / protocol_tvl).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            })
            .unwrap_or(0.0);
        let sigma = pool.number("sigma").unwrap_or(0.0).max(0.0);

        let risk_penalty =
            config.concentration_penalty * concentration + config.variance_penalty * sigma;
        let net_score = apy - risk_penalty;

        let mut red_flags = Vec::new();
        if apy > config.red_flag_apy {
            red_flags.push(String::from("unsustainable-apy"));
        }
        if tvl_usd < 2.0 * config.min_tvl_usd {
            red_flags.push(String::from("thin-liquidity"));
        }

        entries.push(RankedPool {
            pool: pool.entity.clone(),
            project,
            apy,
            tvl_usd,
            risk_penalty,
            net_score,
            red_flags,
        });
    }

    if entries.is_empty() && records.is_empty() {
        return None;
    }

    entries.sort_by(|a, b| {
        b.net_score
            .total_cmp(&a.net_score)
            .then_with(|| a.pool.cmp(&b.pool))
    });
    entries.truncate(top_n.max(1));

    let best_net = entries.first().map(|e| e.net_score).unwrap_or(0.0);
    let score_value = clamp_score(best_net * 5.0);

    let mut factors = BTreeMap::new();
    factors.insert(
        String::from("best_net_yield"),
        FactorContribution {
            weight: 1.0,
            value: score_value,
            contribution: score_value,
        },
    );

    Some(CompositeScore {
        kind: AnalysisKind::YieldRanking,
        score: score_value,
        label: yield_label(score_value).to_owned(),
        factors,
        confidence: bundle_confidence(bundle, &[ProviderId::Defillama]),
        detail: AnalysisDetail::YieldRanking { entries },
    })
}

/// Yield pool records carry `apy`; protocol records carry `tvl`.
fn is_pool(record: &&NormalizedRecord) -> bool {
    record.number("apy").is_some()
}

fn yield_label(score: f64) -> &'static str {
    if score >= 70.0 {
        "attractive"
    } else if score >= 40.0 {
        "moderate"
    } else {
        "thin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ProviderSlot;

    fn pool(id: &str, project: &str, apy: f64, tvl: f64, sigma: f64) -> NormalizedRecord {
        NormalizedRecord::new(id, ProviderId::Defillama)
            .expect("valid")
            .with_fetched_at(900)
            .with_text("project", project)
            .with_number("apy", apy)
            .expect("finite")
            .with_number("tvl_usd", tvl)
            .expect("finite")
            .with_number("sigma", sigma)
            .expect("finite")
    }

    fn protocol(slug: &str, tvl: f64) -> NormalizedRecord {
        NormalizedRecord::new(slug, ProviderId::Defillama)
            .expect("valid")
            .with_fetched_at(900)
            .with_number("tvl", tvl)
            .expect("finite")
    }

    fn bundle(records: Vec<NormalizedRecord>) -> AnalysisBundle {
        AnalysisBundle {
            kind: AnalysisKind::YieldRanking,
            slots: [(
                ProviderId::Defillama,
                ProviderSlot {
                    records,
                    expected_queries: 2,
                    fulfilled_queries: 2,
                    max_age_ms: 300_000,
                },
            )]
            .into_iter()
            .collect(),
            collected_at_ms: 1_000,
        }
    }

    #[test]
    fn pools_below_the_tvl_floor_are_excluded_outright() {
        let bundle = bundle(vec![
            pool("deep", "aave", 6.0, 50_000_000.0, 0.1),
            // Sky-high APY but under the $1M floor: must not appear at all.
            pool("shallow", "degen-farm", 400.0, 900_000.0, 0.1),
        ]);

        let result = score(&bundle, &YieldConfig::default(), 10).expect("scored");
        let AnalysisDetail::YieldRanking { entries } = &result.detail else {
            panic!("wrong detail");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].pool, "deep");
    }

    #[test]
    fn net_score_subtracts_concentration_and_variance_penalties() {
        let bundle = bundle(vec![
            protocol("aave", 100_000_000.0),
            pool("aave-usdc", "aave", 10.0, 50_000_000.0, 0.2),
        ]);

        let result = score(&bundle, &YieldConfig::default(), 10).expect("scored");
        let AnalysisDetail::YieldRanking { entries } = &result.detail else {
            panic!("wrong detail");
        };
        // concentration 0.5 * 8 + sigma 0.2 * 5 = 5.0 penalty.
        assert!((entries[0].risk_penalty - 5.0).abs() < 1e-9);
        assert!((entries[0].net_score - 5.0).abs() < 1e-9);
    }

    #[test]
    fn high_apy_and_thin_tvl_are_flagged_not_dropped() {
        let bundle = bundle(vec![pool("hot", "farm", 80.0, 1_500_000.0, 0.0)]);

        let result = score(&bundle, &YieldConfig::default(), 10).expect("scored");
        let AnalysisDetail::YieldRanking { entries } = &result.detail else {
            panic!("wrong detail");
        };
        assert_eq!(entries.len(), 1);
        assert!(entries[0]
            .red_flags
            .contains(&String::from("unsustainable-apy")));
        assert!(entries[0]
            .red_flags
            .contains(&String::from("thin-liquidity")));
    }

    #[test]
    fn ranking_is_by_net_score_descending() {
        let bundle = bundle(vec![
            pool("low", "a", 3.0, 10_000_000.0, 0.0),
            pool("high", "b", 9.0, 10_000_000.0, 0.0),
            pool("mid", "c", 6.0, 10_000_000.0, 0.0),
        ]);

        let result = score(&bundle, &YieldConfig::default(), 10).expect("scored");
        let AnalysisDetail::YieldRanking { entries } = &result.detail else {
            panic!("wrong detail");
        };
        let order: Vec<&str> = entries.iter().map(|e| e.pool.as_str()).collect();
        assert_eq!(order, vec!["high", "mid", "low"]);
    }

    #[test]
    fn all_pools_excluded_still_scores_zero() {
        let bundle = bundle(vec![pool("shallow", "farm", 50.0, 100_000.0, 0.0)]);

        let result = score(&bundle, &YieldConfig::default(), 10).expect("scored");
        assert_eq!(result.score, 0.0);
        let AnalysisDetail::YieldRanking { entries } = &result.detail else {
            panic!("wrong detail");
        };
        assert!(entries.is_empty());
    }
}
