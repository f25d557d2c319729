use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "sensorctl",
    version,
    about = "Send measure/stop commands to sensors over the MQTT bus"
)]
pub struct Cli {
    /// MQTT broker address.
    #[arg(long, default_value = "localhost")]
    pub broker: String,
    /// MQTT broker port.
    #[arg(long, default_value_t = 1883)]
    pub port: u16,
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long)]
    pub password: Option<String>,
    /// Target sensor ID, or "all" to broadcast to every listening agent.
    #[arg(long)]
    pub sensor_id: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Request a bounded measurement run from the target sensor.
    Measure(MeasureArgs),
    /// Cancel the target sensor's in-flight measurement run, if any.
    Stop,
}

#[derive(Args)]
pub struct MeasureArgs {
    /// Number of readings to take.
    #[arg(long, default_value_t = 10)]
    pub count: u32,
    /// Seconds between readings.
    #[arg(long, default_value_t = 1.0)]
    pub interval: f64,
    /// Base value the readings vary around.
    #[arg(long, default_value_t = 25.0)]
    pub base: f64,
    /// Maximum deviation from the base value.
    #[arg(long, default_value_t = 5.0)]
    pub variance: f64,
}
