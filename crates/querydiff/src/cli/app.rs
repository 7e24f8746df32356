use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use super::commands::check::CheckArgs;

#[derive(Debug, Parser)]
#[command(
    name = "querydiff",
    version,
    about = "Differential result-set equivalence checker for SQL query pairs"
)]
pub struct Cli {
    #[command(flatten)]
    pub runtime: RuntimeArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Args)]
pub struct RuntimeArgs {
    #[arg(long, global = true, value_name = "PATH")]
    pub cwd: Option<PathBuf>,

    #[arg(long, global = true, value_name = "PATH")]
    pub out_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Check(CheckArgs),
}
