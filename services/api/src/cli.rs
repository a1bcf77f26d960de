use crate::report::{run_optimize, run_rank, run_scenarios, OptimizeArgs, RankArgs, ScenariosArgs};
use crate::server;
use card_rewards::error::AppError;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Card Rewards",
    about = "Rank credit cards by reward rate and manage dynamic tier activations",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Rank every card for one transaction
    Rank(RankArgs),
    /// List every reachable reward scenario, best first
    Scenarios(ScenariosArgs),
    /// Show the activation plan for one dynamic card
    Optimize(OptimizeArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override REWARDS_CATALOG_PATH
    #[arg(long)]
    pub(crate) catalog: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Rank(args) => run_rank(args),
        Command::Scenarios(args) => run_scenarios(args),
        Command::Optimize(args) => run_optimize(args),
    }
}
