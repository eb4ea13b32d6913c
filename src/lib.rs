use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

pub mod events;

/// Result type used throughout this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The error type returned by all fallible operations within this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("events API client error: {0}")]
    Client(#[from] events::rapidapi::ClientError),
    #[error("unknown timezone `{0}`")]
    InvalidTimezone(String),
    #[error("unknown locale `{0}`")]
    InvalidLocale(String),
    #[error("invalid format string `{0}`")]
    InvalidFormat(String),
}

/// A link configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Link {
    /// The link title.
    pub title: String,
    /// The URL that it points to.
    pub href: String,
}

/// Configuration of the events API.
#[derive(Deserialize, Serialize, Clone)]
pub struct ApiConfig {
    /// The RapidAPI key. Never has a default; supply it via `CEH_EVENTS__API__API_KEY` or
    /// `config/local.toml`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Value of the `x-rapidapi-host` header.
    #[serde(default = "default_api_host")]
    pub api_host: String,
    /// Base URL of the API. Defaults to `https://{api_host}`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// The page to request.
    #[serde(default = "default_page")]
    pub page: u32,
    /// The number of exchange entries per page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ApiConfig {
    /// Returns the configured base URL or the one derived from `api_host`.
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_owned(),
            None => format!("https://{}", self.api_host),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            api_key: None,
            api_host: default_api_host(),
            base_url: None,
            page: default_page(),
            page_size: default_page_size(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// The key must never end up in logs.
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_host", &self.api_host)
            .field("base_url", &self.base_url)
            .field("page", &self.page)
            .field("page_size", &self.page_size)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

fn default_api_host() -> String {
    "crypto-events-calendar.p.rapidapi.com".into()
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    10
}

fn default_timeout_secs() -> u64 {
    10
}

/// How events are rendered for display.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct DisplayConfig {
    /// IANA timezone used for dates and times, e.g. `Europe/Berlin`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// Locale used for month and weekday names, e.g. `de_DE`.
    #[serde(default = "default_locale")]
    pub locale: String,
    /// strftime format of the event date.
    #[serde(default = "default_date_format")]
    pub date_format: String,
    /// strftime format of the event time.
    #[serde(default = "default_time_format")]
    pub time_format: String,
    /// Whether the event time is derived at all.
    #[serde(default = "default_true")]
    pub include_time: bool,
    /// Also match the search term against event descriptions.
    #[serde(default)]
    pub search_description: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            timezone: default_timezone(),
            locale: default_locale(),
            date_format: default_date_format(),
            time_format: default_time_format(),
            include_time: true,
            search_description: false,
        }
    }
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_locale() -> String {
    "en_US".into()
}

fn default_date_format() -> String {
    "%B %-d, %Y".into()
}

fn default_time_format() -> String {
    "%H:%M".into()
}

fn default_true() -> bool {
    true
}

/// Events configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct EventsConfig {
    /// Source for events.
    pub event_source: events::EventSourceKind,
    /// Events API section.
    #[serde(default)]
    pub api: ApiConfig,
    /// Display section.
    #[serde(default)]
    pub display: DisplayConfig,
    /// Events shown when no live events are available.
    #[serde(default)]
    pub samples: Vec<events::SampleEvent>,
}

/// Website specific configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SiteConfig {
    /// The site title.
    pub title: String,
    /// The tagline displayed in the hero section.
    pub tagline: String,
    /// Optional site description. This is used in the description meta tag.
    pub description: Option<String>,
    /// Links to display in the navigation and the site footer.
    #[serde(default)]
    pub links: Vec<Link>,
}

/// Web server configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ServerConfig {
    /// Address on which the web server will listen.
    pub listen_addr: SocketAddr,
    /// Automatically reload templates when they are modified.
    #[serde(default)]
    pub template_autoreload: bool,
    /// Path to the template directory.
    #[serde(default = "default_template_dir")]
    pub template_dir: PathBuf,
    /// Path to the static directory.
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

fn default_template_dir() -> PathBuf {
    "templates".into()
}

fn default_static_dir() -> PathBuf {
    "static".into()
}

/// Global application configuration.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct AppConfig {
    /// Server configuration section.
    pub server: ServerConfig,
    /// Website configuration section.
    pub site: SiteConfig,
    /// Events configuration section.
    pub events: EventsConfig,
}

impl AppConfig {
    /// Loads the application configuration from files in the `config/` directory and environment
    /// variables.
    pub fn load() -> Result<AppConfig> {
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".into());

        log::info!("loading configuration using {} environment", app_env);

        let config = Config::builder()
            // Configuration defaults from `config/default.toml`.
            .add_source(File::with_name("config/default"))
            // Optional environment specific config overrides, e.g. `config/production.toml`.
            .add_source(File::with_name(&format!("config/{}", app_env)).required(false))
            // Optional local config overrides from `config/local.toml` (on .gitignore).
            .add_source(File::with_name("config/local").required(false))
            // Config from environment variables.
            .add_source(Environment::default().separator("__"))
            // Config from environment variables prefixed with `CEH_`.
            .add_source(
                Environment::with_prefix("CEH")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        log::debug!("loaded configuration: {:?}", config);

        Ok(config)
    }
}
