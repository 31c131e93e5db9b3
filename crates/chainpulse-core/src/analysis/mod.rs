//! Composite scoring: pure functions from an [`AnalysisBundle`] to a
//! [`CompositeScore`].
//!
//! Nothing here performs IO or reads clocks; rescoring the same bundle
//! always yields the same output. Missing inputs degrade the confidence
//! tag, never panic and never fail the analysis.

pub mod dip;
pub mod risk;
pub mod screens;
pub mod sector;
pub mod yield_rank;

use crate::domain::{AnalysisBundle, Confidence};
use crate::ProviderId;

pub(crate) fn clamp_score(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

/// Confidence of an analysis drawing on `providers`.
///
/// The worst contributing slot wins; a planned provider with nothing usable
/// caps the result at `Partial` (the analysis ran on an incomplete view).
pub(crate) fn bundle_confidence(
    bundle: &AnalysisBundle,
    providers: &[ProviderId],
) -> Confidence {
    let mut worst_used: Option<Confidence> = None;
    let mut any_missing = false;

    for provider in providers {
        let confidence = bundle.slot_confidence(*provider);
        if confidence == Confidence::Missing {
            any_missing = true;
        } else {
            worst_used = Some(match worst_used {
                Some(current) => current.min(confidence),
                None => confidence,
            });
        }
    }

    match worst_used {
        Some(confidence) if any_missing => confidence.min(Confidence::Partial),
        Some(confidence) => confidence,
        None => Confidence::Missing,
    }
}

/// Mean over the values of `field` across `records`, `None` when absent.
pub(crate) fn mean_field(
    records: &[crate::domain::NormalizedRecord],
    field: &str,
) -> Option<f64> {
    let values: Vec<f64> = records.iter().filter_map(|r| r.number(field)).collect();
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
