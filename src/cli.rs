//! CLI definitions for klpgen
//!
//! This module contains the clap CLI structure definitions, separated from main.rs
//! so they can be accessed by xtask for documentation generation (man pages, markdown).

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Parser, Subcommand};
use clap_complete::Shell as CompletionShell;
use std::path::PathBuf;

use crate::extractor::BackendKind;

/// Build clap styles.
///
/// - Green: headers, usage, command names
/// - White: descriptions, placeholders
pub fn build_cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Green.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::White.on_default())
        .valid(AnsiColor::White.on_default())
        .invalid(AnsiColor::Red.on_default())
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
}

#[derive(Parser)]
#[command(name = "klpgen")]
#[command(about = "Generate kernel livepatches for many codestreams at once")]
#[command(
    long_about = "klpgen - Extract kernel livepatch sources for every supported codestream.

For each codestream and file listed in <work>/bsc<N>/codestreams.json, klpgen
prepares the kernel build command, runs an extraction tool (klp-ccp or
clang-extract) and collects the symbols the livepatch has to externalize.
Codestreams with identical output are grouped, and the externalized symbols
are checked against the objects of every supported architecture.

QUICK START:
    klpgen extract --bsc 1227320              Extract for all codestreams
    klpgen extract --bsc 1227320 --filter 15.5  Only 15.5 codestreams
    klpgen groups --bsc 1227320               Show codestream groups
    klpgen diff --bsc 1227320 15.4u12 15.5u3  Compare two codestreams

ENVIRONMENT:
    KLP_WORK_DIR, KLP_DATA_DIR, KLP_CCP_PATH, KLP_CCP_POL_PATH, KLP_CE_PATH"
)]
#[command(version)]
#[command(styles = build_cli_styles())]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Directory holding the livepatch directories (overrides KLP_WORK_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Directory holding the extracted kernels (overrides KLP_DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract livepatch sources for all selected codestreams
    #[command(long_about = "Run the full extraction pipeline for a livepatch.

Every (codestream, file) pair is extracted concurrently. Afterwards the
externalized symbols are written back to codestreams.json, codestreams with
equal output are grouped (<bsc>/<backend>/groups) and symbols missing on
other architectures are reported in <bsc>/missing_syms.

A failure of the extraction tool for any item aborts the run. Check the
<backend>.out.txt file in the item's work directory for details.

EXAMPLES:
    klpgen extract --bsc 1227320
    klpgen extract --bsc 1227320 --filter '15\\.5' --backend ce
    klpgen extract --bsc 1227320 --apply-patches --workers 8")]
    Extract {
        /// Livepatch bug number
        #[arg(long, help = "Livepatch bug number (e.g. 1227320)")]
        bsc: String,
        /// Regular expression selecting codestreams
        #[arg(long, help = "Only process codestreams matching this regex")]
        filter: Option<String>,
        /// Apply the patches in <bsc>/fixes before extracting
        #[arg(long, help = "Apply the patches in <bsc>/fixes before extracting")]
        apply_patches: bool,
        /// Extraction tool to use
        #[arg(long, value_enum, help = "Extraction tool (default from config)")]
        backend: Option<BackendKind>,
        /// Number of concurrent extractions
        #[arg(long, short, help = "Number of concurrent extractions (default from config)")]
        workers: Option<usize>,
        /// Symbols klp-ccp must not externalize
        #[arg(long, default_value = "", help = "Comma separated symbols klp-ccp should not externalize")]
        avoid_ext: String,
    },
    /// Show the differences between the output of two codestreams
    #[command(long_about = "Show a unified diff of the normalized output of two codestreams.

Both codestreams must have been extracted before. Files are compared
position by position; codestreams with a different number of files
cannot be compared.

EXAMPLE:
    klpgen diff --bsc 1227320 15.4u12 15.5u3")]
    Diff {
        /// Livepatch bug number
        #[arg(long, help = "Livepatch bug number (e.g. 1227320)")]
        bsc: String,
        /// Backend whose output is compared
        #[arg(long, value_enum, help = "Extraction tool whose output is compared (default from config)")]
        backend: Option<BackendKind>,
        /// First codestream
        #[arg(help = "First codestream (e.g. 15.4u12)")]
        cs1: String,
        /// Second codestream
        #[arg(help = "Second codestream (e.g. 15.5u3)")]
        cs2: String,
    },
    /// Group codestreams by their existing output
    #[command(long_about = "Recompute the codestream groups from existing output.

The extraction tool is not run again; the generated sources of a previous
extract run are normalized and compared. The groups file is rewritten.

EXAMPLE:
    klpgen groups --bsc 1227320")]
    Groups {
        /// Livepatch bug number
        #[arg(long, help = "Livepatch bug number (e.g. 1227320)")]
        bsc: String,
        /// Regular expression selecting codestreams
        #[arg(long, help = "Only group codestreams matching this regex")]
        filter: Option<String>,
        /// Backend whose output is grouped
        #[arg(long, value_enum, help = "Extraction tool whose output is grouped (default from config)")]
        backend: Option<BackendKind>,
    },
    /// Check externalized symbols on every architecture
    #[command(
        name = "check-syms",
        long_about = "Check the externalized symbols stored in codestreams.json against
the prebuilt objects of every architecture the livepatch supports.

Missing symbols are printed and written to <bsc>/missing_syms.

EXAMPLE:
    klpgen check-syms --bsc 1227320 --filter '15\\.4'"
    )]
    CheckSyms {
        /// Livepatch bug number
        #[arg(long, help = "Livepatch bug number (e.g. 1227320)")]
        bsc: String,
        /// Regular expression selecting codestreams
        #[arg(long, help = "Only check codestreams matching this regex")]
        filter: Option<String>,
    },
    /// Manage the klpgen configuration
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Generate shell completions
    #[command(long_about = "Generate shell completion scripts.

EXAMPLE:
    klpgen completions bash > ~/.local/share/bash-completion/completions/klpgen")]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration as TOML
    #[command(long_about = "Display the effective configuration in TOML format.

Config file location: ~/.config/klpgen/config.toml

EXAMPLE:
    klpgen config show")]
    Show,
    /// Write the default configuration file
    #[command(long_about = "Write ~/.config/klpgen/config.toml with default values.

An existing file is left untouched.

EXAMPLE:
    klpgen config init")]
    Init,
}
