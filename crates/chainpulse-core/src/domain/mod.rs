pub mod bundle;
pub mod record;
pub mod score;

pub use bundle::{AnalysisBundle, Confidence, ProviderSlot};
pub use record::{now_ms, FieldValue, NormalizedRecord};
pub use score::{
    AnalysisDetail, AnalysisKind, CompositeScore, DipCandidate, FactorContribution, LadderRung,
    RankedPool, RankedSector, ScreenedAsset,
};
