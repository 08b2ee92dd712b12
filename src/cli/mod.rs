//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// Integration tests for PyTorch training images on EC2
#[derive(Parser, Debug)]
#[command(name = "dlc-ec2-tests")]
#[command(version)]
#[command(about = "Run PyTorch training container tests on EC2 instances")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List test scenarios
    List(ListArgs),

    /// Show resolved instance-type pools
    Instances,

    /// Show collected cases and their precondition verdicts
    Plan(PlanArgs),

    /// Run test scenarios against an image
    Run(RunArgs),

    /// View stored run results
    Results(ResultsArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Show markers, pools, gates and commands
    #[arg(short, long)]
    pub detailed: bool,
}

/// Scenario selection shared by plan and run
#[derive(Parser, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Image URI under test
    #[arg(short, long)]
    pub image: Option<String>,

    /// Scenario name (repeatable)
    #[arg(short, long = "scenario")]
    pub scenarios: Vec<String>,

    /// Integration marker to select
    #[arg(long)]
    pub integration: Option<String>,

    /// Model marker to select
    #[arg(long)]
    pub model: Option<String>,
}

/// Arguments for plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Host for every instance type (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Run cases in parallel
    #[arg(short, long)]
    pub parallel: bool,

    /// Number of concurrent cases (when parallel)
    #[arg(long)]
    pub concurrent: Option<usize>,

    /// Per-case command timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Store the run in the results directory
    #[arg(long)]
    pub save: bool,

    /// Also write the summary to a file
    #[arg(short, long)]
    pub output: Option<String>,
}

/// Arguments for results command
#[derive(Parser, Debug)]
pub struct ResultsArgs {
    /// Show one run in full
    #[arg(long)]
    pub run: Option<String>,

    /// Only runs whose image contains this text
    #[arg(short, long)]
    pub image: Option<String>,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Export the selected (or latest) run to a .json or .csv file
    #[arg(short, long)]
    pub export: Option<String>,

    /// Delete a stored run
    #[arg(long, conflicts_with = "run")]
    pub delete: Option<String>,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "./dlc-ec2-tests.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate (defaults to the standard locations)
        file: Option<String>,
    },

    /// Show environment variables
    Env {
        /// Describe every recognised variable
        #[arg(long)]
        help_vars: bool,
    },
}
