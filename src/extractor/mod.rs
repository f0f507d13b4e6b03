//! Livepatch extraction pipeline.
//!
//! For every (codestream, file) pair of a livepatch the pipeline prepares the
//! compiler invocation, runs an extraction tool that produces a
//! self-contained livepatch source, and collects the symbols the tool had to
//! externalize. Afterwards codestreams with identical output are grouped and
//! the externalized symbols are checked on every supported architecture.
//!
//! # Module Structure
//!
//! - [`backend`] - Extraction tools (klp-ccp, clang-extract)
//! - [`make`] - Compiler command preparation
//! - [`worker`] - Per-item extraction and the parallel executor
//! - [`normalize`] - Output normalization before comparison
//! - [`group`] - Grouping of codestreams with equal output
//! - [`classify`] - Compact codestream range labels
//! - [`tracker`] - Externalized symbol accounting
//! - [`symbols`] - Cross-architecture symbol validation
//! - [`service`] - The driver running all stages

pub mod backend;
pub mod classify;
mod error;
pub mod group;
pub mod make;
pub mod normalize;
pub mod service;
pub mod symbols;
pub mod tracker;
pub mod worker;

pub use backend::{BackendKind, CcpBackend, CeBackend, ExtractorBackend};
pub use classify::{classify_codestreams, natural_sort};
pub use error::{ExtractError, ExtractResult};
pub use group::{diff_codestreams, group_equal, group_labels};
pub use make::{CompilerCommandSource, MakeCommand};
pub use normalize::OutputNormalizer;
pub use service::{PipelineDriver, PipelineOptions, RunSummary};
pub use symbols::{CrossArchSymbolValidator, MissingSymbolReport, NmSymbolTable, SymbolTableSource};
pub use tracker::SymbolTracker;
pub use worker::{ParallelExecutor, DEFAULT_WORKERS};
