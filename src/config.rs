use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Built-in defaults, used by commands that can run without a config file.
    pub fn minimal() -> Self {
        Self::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Environment variable that holds the bot application key.
    #[serde(default = "default_app_key_env")]
    pub app_key_env: String,
    #[serde(default = "default_visitor_biz_id")]
    pub visitor_biz_id: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_search_network")]
    pub search_network: bool,
    #[serde(default = "default_streaming_throttle")]
    pub streaming_throttle: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            app_key_env: default_app_key_env(),
            visitor_biz_id: default_visitor_biz_id(),
            model_name: default_model_name(),
            search_network: default_search_network(),
            streaming_throttle: default_streaming_throttle(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "https://wss.lke.cloud.tencent.com/v1/qbot/chat/sse".to_string()
}
fn default_app_key_env() -> String {
    "TIMELINE_APP_KEY".to_string()
}
fn default_visitor_biz_id() -> String {
    "timeline".to_string()
}
fn default_model_name() -> String {
    "lke-deepseek-v3".to_string()
}
fn default_search_network() -> bool {
    true
}
fn default_streaming_throttle() -> u32 {
    1
}
fn default_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    /// Maximum number of units in flight at once.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed pause between two attempts of the same unit.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl FetchConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

fn default_workers() -> usize {
    5
}
fn default_max_attempts() -> u32 {
    5
}
fn default_retry_delay_secs() -> u64 {
    2
}

/// Query templates. `{period}` and `{topic}` are substituted.
#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_month_template")]
    pub month_template: String,
    #[serde(default = "default_open_template")]
    pub open_template: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            month_template: default_month_template(),
            open_template: default_open_template(),
        }
    }
}

impl QueryConfig {
    pub fn render_month(&self, period: &str, topic: &str) -> String {
        self.month_template
            .replace("{period}", period)
            .replace("{topic}", topic)
    }

    pub fn render_open(&self, topic: &str) -> String {
        self.open_template.replace("{topic}", topic)
    }
}

fn default_month_template() -> String {
    "{period}{topic}详细完整脉络,你要严格按照时间主题输出".to_string()
}
fn default_open_template() -> String {
    "{topic} 详细时间脉络事件发展".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./out")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.service.endpoint.trim().is_empty() {
        anyhow::bail!("service.endpoint must not be empty");
    }

    if config.fetch.workers == 0 {
        anyhow::bail!("fetch.workers must be >= 1");
    }
    if config.fetch.max_attempts == 0 {
        anyhow::bail!("fetch.max_attempts must be >= 1");
    }

    if !config.query.month_template.contains("{topic}")
        || !config.query.month_template.contains("{period}")
    {
        anyhow::bail!("query.month_template must contain {{period}} and {{topic}}");
    }
    if !config.query.open_template.contains("{topic}") {
        anyhow::bail!("query.open_template must contain {{topic}}");
    }

    Ok(())
}
