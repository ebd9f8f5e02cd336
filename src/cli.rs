use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub(crate) struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run a measurement pass over the location catalog
    Test(TestArgs),
    /// List the catalog grouped by region
    Locations,
    /// Print the summary of a saved run (defaults to the latest one)
    Show { file: Option<PathBuf> },
}

#[derive(Args, Debug, Default)]
pub(crate) struct TestArgs {
    /// Directory for result snapshots
    #[arg(long, short)]
    pub(crate) output: Option<PathBuf>,
    /// Parallel streams per provider
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..=64))]
    pub(crate) threads: Option<u16>,
    /// Providers sampled per location
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub(crate) max_providers: Option<u16>,
    /// Only test these catalog locations, in catalog order
    #[arg(long = "location", value_name = "NAME")]
    pub(crate) locations: Vec<String>,
}
