use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::bundle::Confidence;
use crate::error::ValidationError;

/// The six composite analyses the core can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnalysisKind {
    RiskRegime,
    SectorRotation,
    DipBuyer,
    YieldRanking,
    Outperformers,
    MicroCap,
}

impl AnalysisKind {
    pub const ALL: [Self; 6] = [
        Self::RiskRegime,
        Self::SectorRotation,
        Self::DipBuyer,
        Self::YieldRanking,
        Self::Outperformers,
        Self::MicroCap,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RiskRegime => "risk-regime",
            Self::SectorRotation => "sector-rotation",
            Self::DipBuyer => "dip-buyer",
            Self::YieldRanking => "yield-ranking",
            Self::Outperformers => "outperformers",
            Self::MicroCap => "micro-cap",
        }
    }
}

impl Display for AnalysisKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "risk-regime" => Ok(Self::RiskRegime),
            "sector-rotation" => Ok(Self::SectorRotation),
            "dip-buyer" => Ok(Self::DipBuyer),
            "yield-ranking" => Ok(Self::YieldRanking),
            "outperformers" => Ok(Self::Outperformers),
            "micro-cap" => Ok(Self::MicroCap),
            other => Err(ValidationError::InvalidAnalysisKind {
                value: other.to_owned(),
            }),
        }
    }
}

/// One sub-factor's contribution to a composite score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorContribution {
    /// Effective weight after redistribution over present factors.
    pub weight: f64,
    /// Normalized factor value in [0, 100].
    pub value: f64,
    /// `weight * value`, the summand of the composite.
    pub contribution: f64,
}

/// One sector row in the rotation ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedSector {
    pub sector: String,
    /// Trailing-window rate of change of sector volume/TVL, percent.
    pub momentum: f64,
    pub volume_24h: f64,
    pub rank: usize,
}

/// One rung of a dip-buy entry ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LadderRung {
    pub level: usize,
    pub entry_price: f64,
    /// Share of the position allocated at this rung, percent.
    pub allocation_pct: f64,
    /// Discount below current price, percent.
    pub discount_pct: f64,
}

/// One flagged leverage-reset candidate with its entry ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DipCandidate {
    pub asset: String,
    pub current_price: f64,
    pub change_7d: f64,
    pub oi_drop_pct: f64,
    pub reset_score: f64,
    pub ladder: Vec<LadderRung>,
}

/// One scored pool in the yield ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedPool {
    pub pool: String,
    pub project: String,
    pub apy: f64,
    pub tvl_usd: f64,
    pub risk_penalty: f64,
    pub net_score: f64,
    pub red_flags: Vec<String>,
}

/// One asset surviving the outperformer or micro-cap screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenedAsset {
    pub asset: String,
    pub change_7d: f64,
    pub market_cap: f64,
    /// Excess weekly return over the benchmark; zero for the micro-cap screen.
    pub excess_return: f64,
}

/// Per-analysis payload carried alongside the headline score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AnalysisDetail {
    RiskRegime {
        regime: String,
    },
    SectorRotation {
        rankings: Vec<RankedSector>,
    },
    DipBuyer {
        candidates: Vec<DipCandidate>,
    },
    YieldRanking {
        entries: Vec<RankedPool>,
    },
    Outperformers {
        benchmark: String,
        benchmark_return: f64,
        entries: Vec<ScreenedAsset>,
    },
    MicroCap {
        entries: Vec<ScreenedAsset>,
    },
}

/// Final scoring output, immutable once produced.
///
/// `confidence` reflects the minimum confidence among the factors actually
/// used, never an optimistic default. Field maps are ordered so identical
/// inputs serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    pub kind: AnalysisKind,
    /// Headline score in [0, 100].
    pub score: f64,
    pub label: String,
    pub factors: BTreeMap<String, FactorContribution>,
    pub confidence: Confidence,
    pub detail: AnalysisDetail,
}
