use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::record::NormalizedRecord;
use crate::domain::score::AnalysisKind;
use crate::ProviderId;

/// Freshness/completeness tag on aggregated data.
///
/// Variant order matters: `Missing < Stale < Partial < Full`, so the
/// derived `Ord` gives "worst confidence" via `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Missing,
    Stale,
    Partial,
    Full,
}

/// One provider's contribution to an analysis bundle.
///
/// Confidence is never stored: it is derived on demand from the records'
/// freshness and the slot's query completeness, so it cannot drift from the
/// underlying data.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSlot {
    pub records: Vec<NormalizedRecord>,
    /// Queries the aggregator planned for this provider.
    pub expected_queries: usize,
    /// Queries that produced records (fresh or stale).
    pub fulfilled_queries: usize,
    /// Freshness horizon captured from the data-class TTL at collection time.
    pub max_age_ms: i64,
}

impl ProviderSlot {
    pub fn missing(expected_queries: usize) -> Self {
        Self {
            records: Vec::new(),
            expected_queries,
            fulfilled_queries: 0,
            max_age_ms: 0,
        }
    }

    pub fn confidence(&self, now_ms: i64) -> Confidence {
        if self.records.is_empty() || self.fulfilled_queries == 0 {
            return Confidence::Missing;
        }
        let all_stale = self
            .records
            .iter()
            .all(|r| r.age_ms(now_ms) > self.max_age_ms);
        if all_stale {
            return Confidence::Stale;
        }
        if self.fulfilled_queries < self.expected_queries {
            return Confidence::Partial;
        }
        Confidence::Full
    }
}

/// Merged, confidence-annotated output of one aggregation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisBundle {
    pub kind: AnalysisKind,
    pub slots: BTreeMap<ProviderId, ProviderSlot>,
    pub collected_at_ms: i64,
}

impl AnalysisBundle {
    pub fn new(kind: AnalysisKind, collected_at_ms: i64) -> Self {
        Self {
            kind,
            slots: BTreeMap::new(),
            collected_at_ms,
        }
    }

    pub fn slot(&self, provider: ProviderId) -> Option<&ProviderSlot> {
        self.slots.get(&provider)
    }

    pub fn slot_confidence(&self, provider: ProviderId) -> Confidence {
        self.slots
            .get(&provider)
            .map(|slot| slot.confidence(self.collected_at_ms))
            .unwrap_or(Confidence::Missing)
    }

    /// Records from one provider, empty when the slot is missing.
    pub fn records(&self, provider: ProviderId) -> &[NormalizedRecord] {
        self.slots
            .get(&provider)
            .map(|slot| slot.records.as_slice())
            .unwrap_or(&[])
    }

    /// True when no provider contributed any usable records.
    pub fn is_empty(&self) -> bool {
        self.slots
            .values()
            .all(|slot| slot.confidence(self.collected_at_ms) == Confidence::Missing)
    }
}
