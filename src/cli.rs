use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Path to config.yaml
    #[clap(long, default_value = "config.yaml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum DeviceArgs {
    /// Show the active device and index state
    Status {},
    /// Switch the compute device
    Set {
        /// "cpu" or "cuda"
        name: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Parse MorphGNT token files into the corpus checkpoint
    Ingest {
        /// Directory containing *-morphgnt.txt files
        source: String,
    },
    /// Embed the corpus and build the vector index
    Index {},
    /// Find verses similar to a free-text query
    Search {
        /// Query text, any language the model covers
        query: String,

        /// Number of results
        #[clap(short = 'k', long)]
        top_k: Option<usize>,
    },
    /// Find intertextual links for a verse by its index position
    Links {
        /// Zero-based verse position
        position: usize,

        /// Number of links
        #[clap(short = 'k', long)]
        top_k: Option<usize>,

        /// Skip candidates from the verse's own book
        #[clap(long, default_value = "false")]
        exclude_same_book: bool,
    },
    /// Inspect or switch the compute device
    Device {
        #[clap(subcommand)]
        action: DeviceArgs,
    },
}
