use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lotsync_core::query::{ModeParam, QueryParams};

/// CLI configuration parsed from command line arguments and environment variables
#[derive(Parser, Debug)]
#[command(name = "lotsync")]
#[command(
    author,
    version,
    about = "Mirror a paginated vehicle inventory API into PostgreSQL and page through it"
)]
#[command(after_help = "Examples:
  lotsync migrate
  lotsync sync start
  lotsync sync start --resume
  lotsync query --filter make=Toyota,Honda --sort price_asc --page-size 50
  lotsync get veh-0042
  lotsync stats")]
pub struct Config {
    /// PostgreSQL database connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Base URL of the upstream inventory API
    #[arg(long, env = "INVENTORY_API_URL")]
    pub inventory_api_url: Option<String>,

    /// Bearer token for the upstream inventory API
    #[arg(long, env = "INVENTORY_API_KEY", hide_env_values = true)]
    pub inventory_api_key: Option<String>,

    /// Custom path to config.toml
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Control the inventory sync
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
    /// Page through the local mirror; prints one JSON page to stdout
    #[command(after_help = "Examples:
  lotsync query --filter make=Toyota --sort newest
  lotsync query --filter fuel=diesel --price-max 1500000 --page 3
  lotsync query --sort price_asc --cursor <nextCursor>")]
    Query(QueryArgs),
    /// Print one mirrored record as JSON
    Get {
        /// Upstream listing id
        id: String,
    },
    /// Show database statistics
    Stats,
    /// Apply pending database migrations
    Migrate,
}

/// Sync control operations
#[derive(Subcommand, Debug)]
pub enum SyncAction {
    /// Start a run; blocks until it finishes, pauses or fails
    #[command(after_help = "Examples:
  lotsync sync start                  # Fresh run from page 1
  lotsync sync start --resume         # Continue after the last checkpoint
  lotsync sync start --from-page 120  # Fresh run from an explicit page")]
    Start {
        /// Continue from the saved checkpoint instead of starting over
        #[arg(long)]
        resume: bool,

        /// First page to fetch, overriding the checkpoint
        #[arg(long, value_name = "PAGE", value_parser = clap::value_parser!(u32).range(1..))]
        from_page: Option<u32>,

        /// Upstream page size for this run
        #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
        page_size: Option<u32>,
    },
    /// Show the persisted sync status
    Status,
    /// Record a checkpoint at a page
    Checkpoint {
        /// Last fully processed page
        #[arg(value_parser = clap::value_parser!(u32).range(1..))]
        page: u32,
    },
    /// Delete the saved checkpoint
    ClearCheckpoint,
}

/// Filter, sort and paging flags of `lotsync query`
#[derive(Args, Debug, Default)]
pub struct QueryArgs {
    /// Equality filter, repeatable; commas give alternatives (make=Toyota,Honda)
    #[arg(short, long = "filter", value_name = "FIELD=VALUES", value_parser = parse_filter)]
    pub filters: Vec<(String, Vec<String>)>,

    /// Sort shorthand such as price_asc, year_desc or newest
    #[arg(short, long)]
    pub sort: Option<String>,

    /// Items per page (0 or absent uses the configured default)
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Offset mode: 1-based page number
    #[arg(long, conflicts_with = "cursor")]
    pub page: Option<u32>,

    /// Cursor mode: continue after this nextCursor token
    #[arg(long)]
    pub cursor: Option<String>,

    /// Minimum price in cents
    #[arg(long)]
    pub price_min: Option<i64>,

    /// Maximum price in cents
    #[arg(long)]
    pub price_max: Option<i64>,

    /// Maximum mileage
    #[arg(long)]
    pub mileage_max: Option<i64>,

    #[arg(long)]
    pub year_min: Option<i64>,

    #[arg(long)]
    pub year_max: Option<i64>,
}

impl QueryArgs {
    /// Converts flags into the request shape the UI layer sends.
    pub fn into_params(self) -> QueryParams {
        let mut filters: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (field, values) in self.filters {
            filters.entry(field).or_default().extend(values);
        }

        let mode = if self.page.is_some() {
            ModeParam::Offset
        } else {
            ModeParam::Cursor
        };

        QueryParams {
            filters,
            price_min: self.price_min,
            price_max: self.price_max,
            mileage_max: self.mileage_max,
            year_min: self.year_min,
            year_max: self.year_max,
            sort: self.sort,
            mode,
            cursor: self.cursor,
            page: self.page,
            page_size: self.page_size,
            ..QueryParams::default()
        }
    }
}

fn parse_filter(raw: &str) -> Result<(String, Vec<String>), String> {
    let (field, values) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUES, got '{}'", raw))?;

    let field = field.trim();
    if field.is_empty() {
        return Err(format!("missing field name in '{}'", raw));
    }

    let values: Vec<String> = values
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect();
    if values.is_empty() {
        return Err(format!("no values given for '{}'", field));
    }

    Ok((field.to_string(), values))
}
