pub mod document;
pub mod event;
pub mod policy;
pub mod record;
pub mod result;

pub use document::{
    DocumentKind, DocumentLine, DocumentSnapshot, DocumentStatus, RawDocument, RawDocumentLine,
};
pub use event::{EventKind, MatchEvent};
pub use policy::{PolicyRegistry, ToleranceOverride, TolerancePolicy};
pub use record::{MatchRecord, MatchRefs, MatchStatus, MatchType, Resolution};
pub use result::{Classification, Evaluation, MatchScore, VarianceResult};
