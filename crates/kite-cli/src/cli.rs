//! CLI command definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Kite CLI - Run plugin modules against recorded events
#[derive(Parser)]
#[command(name = "kite")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Deliver events from a JSON lines file to a module
    Run {
        /// Module in binary (.wasm) or text (.wat) format
        #[arg(short, long)]
        module: PathBuf,

        /// Engine configuration file (toml, yaml or json)
        #[arg(short, long, env = "KITE_CONFIG")]
        config: Option<PathBuf>,

        /// Events, one JSON object per line
        #[arg(short, long)]
        events: PathBuf,

        /// Scope the module is deployed to
        #[arg(short, long, default_value = "local")]
        scope: String,

        /// User configuration for the module, as a JSON object
        #[arg(short = 'u', long)]
        user_config: Option<PathBuf>,
    },

    /// Negotiate with a module and print its manifest
    Describe {
        /// Module in binary (.wasm) or text (.wat) format
        #[arg(short, long)]
        module: PathBuf,
    },
}
