use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,
    pub mqtt_client_id: String,
    pub mqtt_keepalive_secs: u64,
    pub db_path: PathBuf,
    pub max_queue: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let mqtt_url = env_string(
            "COLLECTOR_MQTT_URL",
            Some("mqtt://127.0.0.1:1883".to_string()),
        )?;
        let url = Url::parse(&mqtt_url).context("invalid COLLECTOR_MQTT_URL")?;
        let mqtt_host = url
            .host_str()
            .ok_or_else(|| anyhow!("COLLECTOR_MQTT_URL missing host"))?
            .to_string();
        let mqtt_port = url.port().unwrap_or(1883);

        let mqtt_username = env_optional("COLLECTOR_MQTT_USERNAME");
        let mqtt_password = env_optional("COLLECTOR_MQTT_PASSWORD");
        let mqtt_topic_prefix =
            env_string("COLLECTOR_TOPIC_PREFIX", Some("sensors".to_string()))?;
        let mqtt_client_id = env_string(
            "COLLECTOR_MQTT_CLIENT_ID",
            Some(format!("data-collector-{}", std::process::id())),
        )?;
        let mqtt_keepalive_secs = env_u64("COLLECTOR_MQTT_KEEPALIVE_SECS", Some(30))?;

        let db_path = PathBuf::from(env_string(
            "COLLECTOR_DB_PATH",
            Some("iot_data.db".to_string()),
        )?);
        let max_queue = env_u64("COLLECTOR_MAX_QUEUE", Some(1024))? as usize;

        Ok(Self {
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic_prefix,
            mqtt_client_id,
            mqtt_keepalive_secs,
            db_path,
            max_queue,
        })
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
