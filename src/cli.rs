use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(author, version, about = "Validate regulatory XML report files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Check one or more report files against their compendium
    Check(CheckArgs),
    /// List the schema descriptors a compendium provides
    Inspect(InspectArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Family {
    /// Tax forms: catalogue XSDs with embedded Schematron assertions
    Fns,
    /// Statistical reports: metaForm templates with control expressions
    Stat,
    /// Document exchange: filename prefix plus XSD
    Edo,
    /// Alcohol-market declarations: pure XSD
    Rar,
}

impl Family {
    pub fn as_str(self) -> &'static str {
        match self {
            Family::Fns => "fns",
            Family::Stat => "stat",
            Family::Edo => "edo",
            Family::Rar => "rar",
        }
    }
}

#[derive(Debug, Args)]
pub struct CheckArgs {
    /// Checking direction
    #[arg(short = 'f', long, value_enum)]
    pub family: Family,
    /// Compendium root directory (overrides the configuration)
    #[arg(short = 'r', long)]
    pub root: Option<PathBuf>,
    /// YAML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
    /// Enable supplemental FNS filename/encoding/period verifications
    #[arg(long)]
    pub strict: bool,
    /// Print each verify result as a JSON line
    #[arg(long)]
    pub json: bool,
    /// Report files to check
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Checking direction
    #[arg(short = 'f', long, value_enum)]
    pub family: Family,
    /// Compendium root directory (overrides the configuration)
    #[arg(short = 'r', long)]
    pub root: Option<PathBuf>,
    /// YAML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,
}
