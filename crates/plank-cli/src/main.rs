mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::webhook::WebhookSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "plank",
    about = "Local-first project tracker: sync tasks with GitHub, Jira and Linear",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .plank/ or .git/)
    #[arg(long, global = true, env = "PLANK_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Receive tracker webhooks and manage outbound notification endpoints
    Webhook {
        #[command(subcommand)]
        subcommand: WebhookSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Webhook {
            subcommand: WebhookSubcommand::Serve { .. } | WebhookSubcommand::Test { .. },
        } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Webhook { subcommand } => cmd::webhook::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
