use crate::commands;
use crate::server;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use admissions::admissions::{ExternalId, RawCondition};
use admissions::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Admission Cutoff Tracker",
    about = "Import applicant lists, rank programs and report cutoff scores",
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
    /// Import roster CSV files for one snapshot date
    Import(ImportArgs),
    /// Rank one partition, a date, every date, or only stale results
    Rank(RankArgs),
    /// Show cutoff scores for a date, or every stored cutoff
    Cutoffs(CutoffArgs),
    /// Show per-priority statistics for a date
    Stats(DateArgs),
    /// List the admitted applicants of one program on one date
    Admitted(PartitionArgs),
    /// Filter the roster with ordered conditions
    Query(QueryArgs),
    /// Count roster rows by program and/or date
    Count(CountArgs),
    /// List snapshot dates present in the roster
    Dates,
    /// Compare roster size and mean total score of two dates
    Compare(CompareArgs),
    /// Remove roster rows
    Delete {
        #[command(subcommand)]
        command: DeleteCommand,
    },
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(Args, Debug)]
pub(crate) struct ImportArgs {
    /// Snapshot date label the files belong to (e.g. 02.08)
    #[arg(long)]
    pub(crate) date: String,
    /// Program code; derived from each file name (`list_PM.csv`) when omitted
    #[arg(long)]
    pub(crate) program: Option<String>,
    /// Roster CSV files
    #[arg(required = true)]
    pub(crate) files: Vec<PathBuf>,
    /// Rank the imported partitions right away
    #[arg(long)]
    pub(crate) rank: bool,
}

#[derive(Args, Debug)]
pub(crate) struct RankArgs {
    #[arg(long)]
    pub(crate) program: Option<String>,
    #[arg(long)]
    pub(crate) date: Option<String>,
    /// Recompute only results invalidated by later roster changes
    #[arg(long, conflicts_with_all = ["program", "date"])]
    pub(crate) stale: bool,
}

#[derive(Args, Debug)]
pub(crate) struct CutoffArgs {
    #[arg(long)]
    pub(crate) date: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct DateArgs {
    #[arg(long)]
    pub(crate) date: String,
}

#[derive(Args, Debug)]
pub(crate) struct PartitionArgs {
    #[arg(long)]
    pub(crate) program: String,
    #[arg(long)]
    pub(crate) date: String,
}

#[derive(Args, Debug)]
pub(crate) struct QueryArgs {
    /// Restrict to one program (requires --date)
    #[arg(long, requires = "date")]
    pub(crate) program: Option<String>,
    #[arg(long, requires = "program")]
    pub(crate) date: Option<String>,
    /// Condition such as "priority = 1" or "or total_score > 200", applied in order
    #[arg(long = "filter", value_parser = crate::infra::parse_filter)]
    pub(crate) filters: Vec<RawCondition>,
    /// Print at most this many rows
    #[arg(long)]
    pub(crate) limit: Option<usize>,
}

#[derive(Args, Debug)]
pub(crate) struct CountArgs {
    #[arg(long)]
    pub(crate) program: Option<String>,
    #[arg(long)]
    pub(crate) date: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct CompareArgs {
    pub(crate) first: String,
    pub(crate) second: String,
}

#[derive(Subcommand, Debug)]
pub(crate) enum DeleteCommand {
    /// Delete one row by its internal id
    Id { id: u64 },
    /// Delete an applicant list id, optionally narrowed to a program and/or date
    ExternalId {
        #[arg(value_parser = crate::infra::parse_external_id)]
        external_id: ExternalId,
        #[arg(long)]
        program: Option<String>,
        #[arg(long)]
        date: Option<String>,
    },
    /// Delete every row matching the conditions
    Filter {
        #[arg(long = "filter", value_parser = crate::infra::parse_filter, required = true)]
        filters: Vec<RawCondition>,
    },
    /// Delete a whole program/date partition and its results
    Partition(PartitionArgs),
    /// Delete the entire roster and all results
    All {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Import(args) => commands::run_import(args),
        Command::Rank(args) => commands::run_rank(args).await,
        Command::Cutoffs(args) => commands::run_cutoffs(args),
        Command::Stats(args) => commands::run_stats(args),
        Command::Admitted(args) => commands::run_admitted(args),
        Command::Query(args) => commands::run_query(args),
        Command::Count(args) => commands::run_count(args),
        Command::Dates => commands::run_dates(),
        Command::Compare(args) => commands::run_compare(args),
        Command::Delete { command } => commands::run_delete(command),
    }
}
