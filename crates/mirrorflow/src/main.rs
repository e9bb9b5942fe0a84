//! Mirrorflow command-line interface
//!
//! - `mirrorflow op ...`: run the mirroring tool under supervision, list, stop
//!   and inspect operations, follow their logs
//! - `mirrorflow catalog ...`: fetch operator catalogs, list operators and
//!   channels
//! - `mirrorflow config`: show effective paths and settings

use anyhow::Result;
use clap::{Parser, Subcommand};
use mirrorflow_logging::{init_logging, LogConfig};
use std::process::ExitCode;
use tracing::debug;

mod cli;

use cli::catalog::CatalogAction;
use cli::context::AppContext;
use cli::op::OpAction;

#[derive(Parser, Debug)]
#[command(name = "mirrorflow", version, about = "Mirror operation supervisor and operator catalog resolver")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mirroring tool operations
    Op {
        #[command(subcommand)]
        action: OpAction,
    },

    /// Operator catalogs
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Show effective paths and settings
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn command_wants_json(command: &Commands) -> bool {
    match command {
        Commands::Op { action } => action.wants_json(),
        Commands::Catalog { action } => action.wants_json(),
        Commands::Config { json } => *json,
    }
}

fn run_command(ctx: AppContext, command: Commands) -> Result<()> {
    if let Commands::Config { json } = command {
        return cli::context::run_show(&ctx, json);
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(async {
        match command {
            Commands::Op { action } => cli::op::run(&ctx, action).await,
            Commands::Catalog { action } => cli::catalog::run(&ctx, action).await,
            Commands::Config { .. } => Ok(()),
        }
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = command_wants_json(&cli.command);

    let result = AppContext::load().and_then(|ctx| {
        if let Err(err) = init_logging(LogConfig {
            app_name: "mirrorflow",
            log_dir: ctx.layout.logs_dir(),
            verbose: cli.verbose,
        }) {
            eprintln!("Warning: failed to initialize logging: {:#}", err);
        }
        debug!("Mirrorflow home: {}", ctx.layout.home.display());
        run_command(ctx, cli.command)
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else if let Some(helpful) = err.downcast_ref::<cli::error::HelpfulError>() {
                eprint!("{}", helpful);
            } else {
                eprintln!("ERROR: {:#}", err);
            }
            ExitCode::from(1)
        }
    }
}
