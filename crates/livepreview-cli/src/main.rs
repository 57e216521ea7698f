#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::needless_raw_string_hashes)]

mod commands;
mod logging;

use clap::Parser;
use livepreview_core::Config;
use miette::{IntoDiagnostic, Result};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "livepreview")]
#[command(author, version, about = "Live preview compiler for generated React components", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Compile a project once and report the preview it produces
    Check {
        /// Project directory (defaults to the working directory)
        dir: Option<PathBuf>,

        /// Print the assembled preview document
        #[arg(long)]
        print_document: bool,

        /// Print the import map
        #[arg(long)]
        print_import_map: bool,

        /// Export index.html and every compiled module into this directory
        #[arg(long, short = 'o', value_name = "DIR")]
        out: Option<PathBuf>,
    },

    /// Serve a live preview that recompiles on every change
    Serve {
        /// Project directory (defaults to the working directory)
        dir: Option<PathBuf>,

        /// Host to bind to (overrides livepreview.json)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides livepreview.json)
        #[arg(long, short = 'p')]
        port: Option<u16>,
    },
}

/// Resolve an optional directory argument against the working directory.
fn project_root(cwd: &Path, dir: Option<&PathBuf>) -> PathBuf {
    match dir {
        Some(dir) if dir.is_absolute() => dir.clone(),
        Some(dir) => cwd.join(dir),
        None => cwd.to_path_buf(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine working directory
    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let config = Config::new(cwd.clone())
        .with_verbosity(cli.verbose)
        .with_json_logs(cli.json);

    logging::init(config.verbosity, config.json_logs);

    match cli.command {
        Some(Commands::Version) | None => commands::version::run(cli.json),
        Some(Commands::Check {
            dir,
            print_document,
            print_import_map,
            out,
        }) => {
            let root = project_root(&config.cwd, dir.as_ref());
            let span = tracing::info_span!("check", cmd = "check", root = %root.display());
            let _guard = span.enter();
            let action = commands::check::CheckAction {
                root,
                print_document,
                print_import_map,
                out: out.map(|o| project_root(&config.cwd, Some(&o))),
            };
            commands::check::run(action, cli.json)
        }
        Some(Commands::Serve { dir, host, port }) => {
            let action = commands::serve::ServeAction {
                root: project_root(&config.cwd, dir.as_ref()),
                host,
                port,
            };
            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::serve::run(action))
        }
    }
}
