use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "sensor-agent",
    version,
    about = "Simulated MQTT sensor with command-driven measurement runs"
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
    /// Sensor type, e.g. temperature, humidity, pressure.
    #[arg(long)]
    pub sensor: String,
    /// Unique sensor ID (defaults to the sensor type).
    #[arg(long)]
    pub sensor_id: Option<String>,
    /// Telemetry topic prefix.
    #[arg(long, default_value = "sensors")]
    pub topic_prefix: String,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Listen for measure/stop commands and publish readings on demand.
    Listen,
    /// Publish a single reading and exit.
    Send(SendArgs),
    /// Publish readings continuously without command control.
    Simulate(SimulateArgs),
}

#[derive(Args)]
pub struct SendArgs {
    /// Sensor value to send.
    #[arg(long)]
    pub value: f64,
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Simulation duration in seconds.
    #[arg(long, default_value_t = 60)]
    pub duration: u64,
    /// Seconds between readings.
    #[arg(long, default_value_t = 1.0)]
    pub interval: f64,
    /// Base value for the simulation.
    #[arg(long)]
    pub base: f64,
    /// Maximum deviation from the base value.
    #[arg(long, default_value_t = 5.0)]
    pub variance: f64,
}
