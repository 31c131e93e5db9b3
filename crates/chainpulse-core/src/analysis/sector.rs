//! Sector rotation ranking.
//!
//! Sectors are ordered by trailing momentum; equal momentum breaks on 24h
//! volume, then name, so the ranking is total and re-running it on the same
//! bundle can never reshuffle equal rows.
//!
//! Momentum is the category's 24h market-cap rate of change: the categories
//! listing exposes no longer-horizon per-sector series, so the 24h figure
//! stands in for trailing momentum.

use std::collections::BTreeMap;

use crate::analysis::{bundle_confidence, clamp_score};
use crate::domain::{
    AnalysisBundle, AnalysisDetail, AnalysisKind, CompositeScore, FactorContribution, RankedSector,
};
use crate::ProviderId;

pub fn score(bundle: &AnalysisBundle, top_n: usize) -> Option<CompositeScore> {
    let mut sectors: Vec<RankedSector> = bundle
        .records(ProviderId::Coingecko)
        .iter()
        .filter_map(|record| {
            let momentum = record.number("momentum")?;
            Some(RankedSector {
                sector: record
                    .text("name")
                    .unwrap_or(record.entity.as_str())
                    .to_owned(),
                momentum,
                volume_24h: record.number("volume_24h").unwrap_or(0.0),
                rank: 0,
            })
        })
        .collect();

    if sectors.is_empty() {
        return None;
    }

    sectors.sort_by(|a, b| {
        b.momentum
            .total_cmp(&a.momentum)
            .then_with(|| b.volume_24h.total_cmp(&a.volume_24h))
            .then_with(|| a.sector.cmp(&b.sector))
    });

    let advancing = sectors.iter().filter(|s| s.momentum > 0.0).count();
    let score_value = clamp_score(advancing as f64 / sectors.len() as f64 * 100.0);

    sectors.truncate(top_n.max(1));
    for (index, sector) in sectors.iter_mut().enumerate() {
        sector.rank = index + 1;
    }

    let mut factors = BTreeMap::new();
    factors.insert(
        String::from("advancing_share"),
        FactorContribution {
            weight: 1.0,
            value: score_value,
            contribution: score_value,
        },
    );

    Some(CompositeScore {
        kind: AnalysisKind::SectorRotation,
        score: score_value,
        label: rotation_label(score_value).to_owned(),
        factors,
        confidence: bundle_confidence(bundle, &[ProviderId::Coingecko]),
        detail: AnalysisDetail::SectorRotation { rankings: sectors },
    })
}

fn rotation_label(score: f64) -> &'static str {
    if score >= 70.0 {
        "broad-advance"
    } else if score >= 40.0 {
        "mixed"
    } else {
        "broad-retreat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NormalizedRecord, ProviderSlot};

    fn sector(name: &str, momentum: f64, volume: f64) -> NormalizedRecord {
        NormalizedRecord::new(name.to_lowercase(), ProviderId::Coingecko)
            .expect("valid")
            .with_fetched_at(900)
            .with_text("name", name)
            .with_number("momentum", momentum)
            .expect("finite")
            .with_number("volume_24h", volume)
            .expect("finite")
    }

    fn bundle(records: Vec<NormalizedRecord>) -> AnalysisBundle {
        AnalysisBundle {
            kind: AnalysisKind::SectorRotation,
            slots: [(
                ProviderId::Coingecko,
                ProviderSlot {
                    records,
                    expected_queries: 1,
                    fulfilled_queries: 1,
                    max_age_ms: 300_000,
                },
            )]
            .into_iter()
            .collect(),
            collected_at_ms: 1_000,
        }
    }

    #[test]
    fn ranks_by_momentum_with_volume_then_name_tiebreaks() {
        let bundle = bundle(vec![
            sector("DeFi", 18.0, 9_000_000_000.0),
            sector("Gaming", 24.0, 2_000_000_000.0),
            sector("AI", 24.0, 5_000_000_000.0),
        ]);

        let result = score(&bundle, 10).expect("scored");
        let AnalysisDetail::SectorRotation { rankings } = &result.detail else {
            panic!("wrong detail");
        };

        // AI and Gaming tie on momentum; AI wins on volume.
        assert_eq!(rankings[0].sector, "AI");
        assert_eq!(rankings[1].sector, "Gaming");
        assert_eq!(rankings[2].sector, "DeFi");
        assert_eq!(rankings[0].rank, 1);
        assert_eq!(rankings[2].rank, 3);
    }

    #[test]
    fn equal_momentum_and_volume_breaks_on_name() {
        let bundle = bundle(vec![
            sector("Zeta", 10.0, 1_000.0),
            sector("Alpha", 10.0, 1_000.0),
        ]);

        let result = score(&bundle, 10).expect("scored");
        let AnalysisDetail::SectorRotation { rankings } = &result.detail else {
            panic!("wrong detail");
        };
        assert_eq!(rankings[0].sector, "Alpha");
        assert_eq!(rankings[1].sector, "Zeta");
    }

    #[test]
    fn headline_score_is_the_advancing_share() {
        let bundle = bundle(vec![
            sector("A", 5.0, 1.0),
            sector("B", -3.0, 1.0),
            sector("C", 2.0, 1.0),
            sector("D", -1.0, 1.0),
        ]);

        let result = score(&bundle, 10).expect("scored");
        assert!((result.score - 50.0).abs() < 1e-9);
        assert_eq!(result.label, "mixed");
    }

    #[test]
    fn top_n_truncates_the_ranking() {
        let bundle = bundle(vec![
            sector("A", 3.0, 1.0),
            sector("B", 2.0, 1.0),
            sector("C", 1.0, 1.0),
        ]);

        let result = score(&bundle, 2).expect("scored");
        let AnalysisDetail::SectorRotation { rankings } = &result.detail else {
            panic!("wrong detail");
        };
        assert_eq!(rankings.len(), 2);
    }

    #[test]
    fn sectors_without_momentum_yield_no_score() {
        let record = NormalizedRecord::new("misc", ProviderId::Coingecko)
            .expect("valid")
            .with_fetched_at(900);
        assert!(score(&bundle(vec![record]), 10).is_none());
    }
}
