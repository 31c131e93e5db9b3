//! Market screens: benchmark outperformers and liquid micro-caps.

use std::collections::BTreeMap;

use crate::analysis::{bundle_confidence, clamp_score};
use crate::config::ScreenConfig;
use crate::domain::{
    AnalysisBundle, AnalysisDetail, AnalysisKind, CompositeScore, FactorContribution,
    ScreenedAsset,
};
use crate::ProviderId;

/// Assets beating the benchmark's weekly return, sorted by excess return.
///
/// Returns `None` when the benchmark itself is absent from the data; there
/// is nothing meaningful to compare against.
pub fn outperformers(
    bundle: &AnalysisBundle,
    config: &ScreenConfig,
    benchmark: &str,
    top_n: usize,
) -> Option<CompositeScore> {
    let records = bundle.records(ProviderId::Coingecko);
    let benchmark_return = records
        .iter()
        .find(|r| r.entity == benchmark)?
        .number("change_7d")?;

    let mut screened = 0usize;
    let mut entries = Vec::new();
    for record in records {
        if record.entity == benchmark {
            continue;
        }
        let (Some(change_7d), Some(volume)) =
            (record.number("change_7d"), record.number("volume_24h"))
        else {
            continue;
        };
        if volume < config.min_volume_24h {
            continue;
        }
        screened += 1;
        if change_7d > benchmark_return {
            entries.push(ScreenedAsset {
                asset: record.entity.clone(),
                change_7d,
                market_cap: record.number("market_cap").unwrap_or(0.0),
                excess_return: change_7d - benchmark_return,
            });
        }
    }

    entries.sort_by(|a, b| {
        b.excess_return
            .total_cmp(&a.excess_return)
            .then_with(|| a.asset.cmp(&b.asset))
    });

    let score_value = if screened == 0 {
        0.0
    } else {
        clamp_score(entries.len() as f64 / screened as f64 * 100.0)
    };
    entries.truncate(top_n.max(1));

    Some(build(
        bundle,
        AnalysisKind::Outperformers,
        score_value,
        "outperforming_share",
        AnalysisDetail::Outperformers {
            benchmark: benchmark.to_owned(),
            benchmark_return,
            entries,
        },
    ))
}

/// Liquid micro-caps: market cap under the ceiling, 24h volume over the
/// floor.
pub fn micro_cap(
    bundle: &AnalysisBundle,
    config: &ScreenConfig,
    top_n: usize,
) -> Option<CompositeScore> {
    let records = bundle.records(ProviderId::Coingecko);
    if records.is_empty() {
        return None;
    }

    let mut screened = 0usize;
    let mut entries = Vec::new();
    for record in records {
        let (Some(market_cap), Some(volume)) =
            (record.number("market_cap"), record.number("volume_24h"))
        else {
            continue;
        };
        screened += 1;
        if market_cap > 0.0 && market_cap < config.micro_cap_ceiling && volume >= config.min_volume_24h
        {
            entries.push(ScreenedAsset {
                asset: record.entity.clone(),
                change_7d: record.number("change_7d").unwrap_or(0.0),
                market_cap,
                excess_return: 0.0,
            });
        }
    }

    entries.sort_by(|a, b| {
        b.change_7d
            .total_cmp(&a.change_7d)
            .then_with(|| a.asset.cmp(&b.asset))
    });

    let score_value = if screened == 0 {
        0.0
    } else {
        clamp_score(entries.len() as f64 / screened as f64 * 100.0)
    };
    entries.truncate(top_n.max(1));

    Some(build(
        bundle,
        AnalysisKind::MicroCap,
        score_value,
        "matching_share",
        AnalysisDetail::MicroCap { entries },
    ))
}

fn build(
    bundle: &AnalysisBundle,
    kind: AnalysisKind,
    score: f64,
    factor_name: &str,
    detail: AnalysisDetail,
) -> CompositeScore {
    let mut factors = BTreeMap::new();
    factors.insert(
        factor_name.to_owned(),
        FactorContribution {
            weight: 1.0,
            value: score,
            contribution: score,
        },
    );

    CompositeScore {
        kind,
        score,
        label: screen_label(score).to_owned(),
        factors,
        confidence: bundle_confidence(bundle, &[ProviderId::Coingecko]),
        detail,
    }
}

fn screen_label(score: f64) -> &'static str {
    if score >= 40.0 {
        "broad"
    } else if score > 0.0 {
        "selective"
    } else {
        "empty"
    }
}
