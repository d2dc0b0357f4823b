//! Privacy governor for Custodia.
//!
//! Incoming user data is classified against an ordered rule table, tagged,
//! stored encrypted when the matching rule requires it, and later deleted or
//! anonymized by periodic retention sweeps.
//!
//! # Modules
//!
//! - [`classify`] — sensitivity levels and the ordered classification table.
//! - [`tags`] — keyword-based topical tagging.
//! - [`anonymize`] — identifier scrubbing and statistics-only summaries.
//! - [`consent`] — the consent prompt seam and recorded decisions.
//! - [`settings`] — hot-reloadable privacy settings.
//! - [`governor`] — the [`PrivacyGovernor`] service.
//! - [`error`] — Unified error types.

pub mod anonymize;
pub mod classify;
pub mod consent;
pub mod error;
pub mod governor;
pub mod settings;
pub mod tags;

// Re-export the most commonly used types at the crate root for convenience.
pub use anonymize::Anonymizer;
pub use classify::{Classification, ClassificationRule, RuleTable, Sensitivity};
pub use consent::{ConsentOutcome, ConsentPrompt, ConsentRecord, ConsentRequest, DenyAllPrompt};
pub use error::{PrivacyError, Result};
pub use governor::{
    CleanupReport, DataItem, IndexEntry, ItemPointer, PrivacyGovernor, PrivacyReport, StoreRequest,
};
pub use settings::{AnonymizationSettings, ConsentSettings, PrivacySettings};
pub use tags::TagExtractor;
