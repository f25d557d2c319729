use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "data-collector",
    version,
    about = "Persist sensor telemetry from the MQTT bus into SQLite"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Subscribe to the telemetry feed and persist readings (the default).
    Run,
    /// Print the most recent stored reading for each topic.
    Latest,
    /// Print the most recent stored readings, newest first.
    Recent(RecentArgs),
}

#[derive(Args)]
pub struct RecentArgs {
    /// How many readings to print.
    #[arg(long, default_value_t = 10)]
    pub count: u32,
}
