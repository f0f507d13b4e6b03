//! klpgen - CLI entry point

mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use klpgen::cli::{Cli, Commands, ConfigCommands};

use commands::GlobalArgs;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let globals = GlobalArgs {
        work_dir: cli.work_dir,
        data_dir: cli.data_dir,
    };

    match cli.command {
        Commands::Extract {
            bsc,
            filter,
            apply_patches,
            backend,
            workers,
            avoid_ext,
        } => commands::extract::handle(
            &globals,
            &bsc,
            filter.as_deref(),
            apply_patches,
            backend,
            workers,
            &avoid_ext,
        ),
        Commands::Diff {
            bsc,
            backend,
            cs1,
            cs2,
        } => commands::diff::handle(&globals, &bsc, backend, &cs1, &cs2),
        Commands::Groups {
            bsc,
            filter,
            backend,
        } => commands::groups::handle(&globals, &bsc, filter.as_deref(), backend),
        Commands::CheckSyms { bsc, filter } => {
            commands::check_syms::handle(&globals, &bsc, filter.as_deref())
        }
        Commands::Config(cmd) => match cmd {
            ConfigCommands::Show => commands::config::handle_show(),
            ConfigCommands::Init => commands::config::handle_init(),
        },
        Commands::Completions { shell } => commands::completions::handle::<Cli>(shell),
    }
}

/// Install the log subscriber. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("klpgen={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}
