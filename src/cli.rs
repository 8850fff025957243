use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "wellcast",
    version,
    about = "Wellbeing suggestions and signals from declarative rules and regional weather"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config.yaml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override SQLite data directory
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch weather for every region and store the day's snapshots
    UpdateWeather {
        /// Day to update (YYYY-MM-DD, defaults to today UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Refresh weather, then precompute every region's env suggestions
    BuildSnapshots {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Evaluate triggers for one user or all users
    EvaluateSignals {
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Only evaluate this user
        #[arg(long)]
        user: Option<i64>,
        /// Print events as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a user's suggestions for a day
    Suggest {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long)]
        json: bool,
    },
    /// Import users, regions, logs and topics from the app database
    Sync {
        /// Import daily logs from this day on (defaults to 7 days ago)
        #[arg(long)]
        since: Option<NaiveDate>,
    },
    /// Validate rules, triggers and config, and test data sources
    Check,
    /// Run interactive setup
    Init,
}
