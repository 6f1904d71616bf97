//! stratum cli interface

use clap::{Args, Parser, Subcommand, ValueEnum};
use stratum::merge::ListMergeStrategy;
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Change the work directory
    ///
    /// Can be specified multiple times. Note that all
    /// paths on the way to the final path must exist.
    ///
    /// This is equivalent to running { cd <directory>; stratum ... }
    #[clap(short = 'C', long = "directory", global(true))]
    pub directory: Vec<PathBuf>,

    #[clap(flatten)]
    pub engine: EngineArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug)]
pub struct EngineArgs {
    /// Engine configuration file
    #[clap(long = "config", default_value = stratum::config::CONFIG_FILE, global(true))]
    pub config: PathBuf,

    /// Repository root, overrides `base_path` of the configuration file
    #[clap(long = "base-path", env = "STRATUM_BASE_PATH", global(true))]
    pub base_path: Option<PathBuf>,

    /// How lists are merged: replace, append or merge
    #[clap(
        long = "list-merge-strategy",
        env = "STRATUM_LIST_MERGE_STRATEGY",
        global(true)
    )]
    pub list_merge_strategy: Option<ListMergeStrategy>,

    /// Read component outputs from a yaml file (`<stack>: <component>: <key>: <value>`)
    #[clap(long = "outputs-file", global(true))]
    pub outputs_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print resolved configuration
    Describe(DescribeCommand),

    /// List stacks or components
    #[command(alias = "ls")]
    List(ListCommand),

    /// Resolve every deployable component of every stack
    Validate,
}

#[derive(Parser, Debug)]
pub struct DescribeCommand {
    #[command(subcommand)]
    pub command: DescribeSubCommand,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Subcommand, Debug)]
pub enum DescribeSubCommand {
    /// Fully resolved configuration of a component in a stack
    Component {
        component: String,

        #[arg(short = 's', long = "stack")]
        stack: String,

        /// Include the documents each value came from
        #[arg(long)]
        provenance: bool,

        /// Include the components this component reads from
        #[arg(long)]
        dependencies: bool,
    },

    /// Merged stack, before component resolution
    Stack { stack: String },

    /// Evaluated locals per document of a stack
    Locals { stack: String },
}

#[derive(Parser, Debug)]
pub struct ListCommand {
    #[command(subcommand)]
    pub command: ListSubCommand,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Subcommand, Debug)]
pub enum ListSubCommand {
    /// Deployable components
    Components {
        #[arg(short = 's', long = "stack")]
        stack: Option<String>,
    },

    Stacks,
}

#[derive(Parser, Debug)]
pub struct OutputArgs {
    #[arg(short = 'F', long = "output-format", default_value_t)]
    pub format: OutputFormat,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}
