//! klpgen Library
//!
//! Generates kernel livepatch sources for many codestreams at once by running
//! an extraction tool per (codestream, file) pair, grouping codestreams with
//! equal output and checking externalized symbols on every architecture.

pub mod cli;
pub mod codestream;
pub mod config;
pub mod extractor;
pub mod patches;
pub mod templates;

pub use codestream::{Codestream, CodestreamTable, CodestreamVersion, FileData};
pub use config::{Config, Layout, LivepatchConf, Workspace};
pub use extractor::{ExtractError, ExtractResult, PipelineDriver};
