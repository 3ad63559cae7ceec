//! Convenience re-exports for common `packsmith` types.
//!
//! ```ignore
//! use packsmith::prelude::*;
//! ```
//!
//! Covers building a [`Composer`], describing requests and evidence, and the
//! stock config stores and indexes. Lower-level pieces (the tokenizer, cache
//! internals, query strategies) are left in their modules.

// ── Composition ─────────────────────────────────────────────────────
pub use crate::compose::{Composer, Composition, DraftInputs, DraftRequest};
pub use crate::error::{ComposeError, IndexError};
pub use crate::evaluate::{Evaluation, evaluate};
pub use crate::evidence::{EvidenceSet, EvidenceSource, MemoryEvidence};
pub use crate::{Message, MessageRole};

// ── Configuration ───────────────────────────────────────────────────
pub use crate::config::{ComposerConfig, ConfigStore, EnvConfig, StaticConfig};

// ── Templates ───────────────────────────────────────────────────────
pub use crate::pack::{PackRef, PackVersion};
pub use crate::repository::{
    ApprovalStatus, HttpTemplateIndex, InMemoryIndex, IndexRecord, TemplateDocument,
    TemplateIndex, TemplateMetadata,
};
