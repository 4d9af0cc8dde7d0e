pub mod catalog;
pub mod classifier;
pub mod config;
pub mod error;
pub mod fees;
pub mod fields;
pub mod heuristics;
pub mod identifiers;
pub mod ingest;
pub mod merge;
pub mod models;
pub mod orchestrator;
pub mod pdf;
pub mod store;
pub mod text;
pub mod validate;

pub use catalog::ExpertCatalog;
pub use classifier::{classify, tag_kind};
pub use config::{BatchOptions, ExtractionConfig, PriorityWeights, RelevanceRules};
pub use error::{BatchError, IngestError, LookupError, StoreError};
pub use fees::{FeeAliases, FeeEntry, FeeSchedule, FeeTable};
pub use fields::FieldExtractor;
pub use identifiers::{is_valid_judicial, numbers_match, ExpectedIdentifiers};
pub use ingest::{discover_archives, DocumentLoader, LoadedArchive};
pub use merge::{
    next_step, ArchiveOutcome, Completeness, DocumentSummary, Expansion, ExtractionPipeline,
    FieldAttribution, ProcessContext,
};
pub use models::{Bucket, ExtractionResult, Field, FieldCandidate, LogicalDocument};
pub use orchestrator::{BatchRunner, BatchSummary};
pub use pdf::{LopdfExtractor, PageText, PdfExtractor};
pub use store::{
    cleanup_old_logs, export_documents, generate_run_id, table_columns, ArchiveRecord,
    ArtifactStore, AuditEntry, AuditLog, RunState,
};
