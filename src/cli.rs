use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "orgctl")]
#[command(author = "Eli Fine")]
#[command(version)]
#[command(about = "Declare and converge an AWS Organization", long_about = None)]
pub struct Cli {
    /// Stack to operate on, usually the git branch name
    #[arg(long, env = "STACK_NAME")]
    pub stack: String,

    /// Converge the declared resources instead of previewing
    #[arg(long)]
    pub apply: bool,

    /// Tear the stack down instead of converging it
    #[arg(long, conflicts_with = "apply")]
    pub destroy: bool,

    /// Settings file to use instead of the default search path
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}
