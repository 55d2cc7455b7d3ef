use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start rolodex as a service.
    Daemon {},

    /// Search the catalog.
    Search {
        /// Owner whose catalog is searched
        #[clap(short, long)]
        owner: String,

        /// Free-text query; omit to browse newest first
        #[clap(short, long)]
        query: Option<String>,

        /// Category filter (substring match)
        #[clap(long)]
        category: Option<String>,

        /// Vendor filter (substring match)
        #[clap(long)]
        vendor: Option<String>,

        /// Colour filter (hex code)
        #[clap(long)]
        colour: Option<String>,

        /// Price ceiling
        #[clap(long)]
        price_max: Option<f64>,

        /// Page size
        #[clap(short, long)]
        limit: Option<usize>,

        /// Cursor returned by a previous page
        #[clap(long)]
        cursor: Option<String>,

        /// Force the keyword path even when embeddings exist
        #[clap(short, long, default_value = "false")]
        keyword: bool,
    },

    /// Capture an item into the catalog.
    Add {
        /// Owner the item is captured for
        #[clap(short, long)]
        owner: String,

        /// Product image url
        #[clap(long)]
        img_url: String,

        /// Source page url
        #[clap(long)]
        src_url: Option<String>,

        #[clap(short, long)]
        title: Option<String>,

        #[clap(long)]
        vendor: Option<String>,

        #[clap(short, long)]
        description: Option<String>,

        #[clap(long)]
        category: Option<String>,

        #[clap(long)]
        material: Option<String>,

        /// Dominant colour as a hex code
        #[clap(long)]
        colour: Option<String>,

        #[clap(long)]
        price: Option<f64>,

        #[clap(long)]
        currency: Option<String>,
    },

    /// Generate embeddings for items that are missing one.
    Reembed {
        #[clap(short, long)]
        owner: String,
    },
}
