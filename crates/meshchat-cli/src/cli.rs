//! Command-line interface definitions and parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive MeshChat nodes over a simulated radio mesh", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one message across a line of simulated nodes and report what happened
    Simulate {
        /// Node names, linked in a line in this order
        #[arg(short, long, value_delimiter = ',', default_value = "alice,bob,carol")]
        nodes: Vec<String>,
        /// Sender (defaults to the first node)
        #[arg(long)]
        from: Option<String>,
        /// Receiver (defaults to the last node)
        #[arg(long)]
        to: Option<String>,
        /// Message text
        #[arg(short, long, default_value = "hello over the mesh")]
        message: String,
        /// Send before any link exists, then bring the mesh up
        #[arg(long)]
        late_link: bool,
        /// Give up after this many seconds
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
    /// Drive a simulated mesh with line commands from stdin
    Interactive {
        /// Node names
        #[arg(short, long, value_delimiter = ',', default_value = "alice,bob,carol")]
        nodes: Vec<String>,
    },
    /// Print the effective configuration as TOML
    Config,
}
