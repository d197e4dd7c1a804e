use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "bucketkv",
    about = "Key/value configuration stored in an S3-compatible bucket",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Object store endpoint; repeatable, only the first is used
    #[arg(long = "endpoint", global = true)]
    pub endpoints: Vec<String>,

    /// Connect with TLS
    #[arg(long, global = true)]
    pub secure: bool,

    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Prefix for the credential, bucket and root path variables
    #[arg(long, global = true)]
    pub env_prefix: Option<String>,

    /// TOML file with connection settings; flags override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the merged JSON tree under a prefix
    Get(GetArgs),
    /// Write a value
    Set(SetArgs),
    /// Print stored keys and values under a prefix
    List(ListArgs),
    /// Print change events until interrupted
    Watch(WatchArgs),
}

#[derive(Args)]
pub struct GetArgs {
    #[arg(default_value = "")]
    pub prefix: String,
}

#[derive(Args)]
#[command(group = clap::ArgGroup::new("source").required(true).args(["value", "file"]))]
pub struct SetArgs {
    pub key: String,
    pub value: Option<String>,
    /// Read the value from a file
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Treat KEY as a logical key: store under ROOT_PATH + KEY + ".json"
    #[arg(long)]
    pub logical: bool,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(default_value = "")]
    pub prefix: String,
}

#[derive(Args)]
pub struct WatchArgs {
    #[arg(default_value = "")]
    pub key: String,
}
