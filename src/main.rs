//! XcodeCache CLI
//!
//! Entry point for the `xcodecache` command-line tool. Each subcommand is
//! one stage of the orchestration protocol; `pre` and `post` wrap a
//! build, `printenv` and `extract` are invoked per target by the build
//! tool through injected script phases.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use xcodecache::config::CacheConfig;
use xcodecache::orchestrator::{self, RunContext, StageError};

#[derive(Parser)]
#[command(name = "xcodecache")]
#[command(about = "Build-artifact cache for CocoaPods-managed workspaces", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint targets and rewire the projects before the build
    Pre {
        /// The build tool's argument vector (after --)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        build_args: Vec<String>,
    },

    /// Archive built products and restore the projects after the build
    Post {
        /// The build tool's argument vector (after --)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        build_args: Vec<String>,
    },

    /// Capture the build environment of one miss target (build-time)
    Printenv {
        /// Target name
        target_name: String,

        /// Path of the `.xcodeproj` directory holding the sidecar
        project_path: PathBuf,
    },

    /// Materialize a cached product into the build tree (build-time)
    Extract {
        /// Bound cache entry directory
        cache_dir: PathBuf,

        /// Product directory relative to SYMROOT
        relative_product_dir: String,

        /// Intermediate directory relative to OBJROOT
        relative_intermediate_dir: String,
    },

    /// Restore projects and remove sidecars without building
    Clean,
}

fn main() {
    xcodecache::logging::init();

    if let Err(err) = dispatch() {
        log::error!("{}", err);
        process::exit(err.exit_code());
    }
}

fn dispatch() -> Result<(), StageError> {
    let cli = Cli::parse();
    let config = CacheConfig::from_env()?;

    match cli.command {
        Commands::Pre { build_args } => {
            let mut ctx = RunContext::from_process(config)?;
            orchestrator::pre::run(&mut ctx, &build_args)?;
        }
        Commands::Post { build_args } => {
            let mut ctx = RunContext::from_process(config)?;
            orchestrator::post::run(&mut ctx, &build_args)?;
        }
        Commands::Printenv {
            target_name,
            project_path,
        } => {
            let env: BTreeMap<String, String> = std::env::vars().collect();
            orchestrator::printenv::run(&target_name, &project_path, &env)?;
        }
        Commands::Extract {
            cache_dir,
            relative_product_dir,
            relative_intermediate_dir,
        } => {
            let env: BTreeMap<String, String> = std::env::vars().collect();
            orchestrator::extract::run(
                &cache_dir,
                &relative_product_dir,
                &relative_intermediate_dir,
                &env,
            )?;
        }
        Commands::Clean => {
            let ctx = RunContext::from_process(config)?;
            orchestrator::clean::run(&ctx)?;
        }
    }
    Ok(())
}
