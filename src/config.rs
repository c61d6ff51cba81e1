//! Configuration types.
//!
//! Everything comes from environment variables (optionally seeded from a
//! `.env` file by the binary). [`RelayConfig::from_lookup`] takes any
//! key lookup so tests never touch the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::ChannelId;
use crate::error::ConfigError;
use crate::pipeline::{FilterEngine, Footer};
use crate::relay::DEFAULT_IDLE_WAIT;
use crate::scheduler::{DEFAULT_SCAN_BUDGET, DEFAULT_WINDOW_SIZE};
use crate::store::DEFAULT_DEDUP_CAP;

pub const DEFAULT_POST_DELAY_SECS: u64 = 60;
pub const DEFAULT_STATE_PATH: &str = "./data/posted_fingerprints.json";
pub const DEFAULT_BOOTSTRAP_LIMIT: usize = 100;
pub const DEFAULT_FOOTER_LABEL: &str = "👉";
pub const DEFAULT_FOOTER_LINK_TEXT: &str = "Subscribe to the channel";

/// Keyword lists for the content filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterConfig {
    /// Post only if one of these appears (empty: no restriction).
    pub include: Vec<String>,
    /// Never post if one of these appears.
    pub exclude: Vec<String>,
}

impl FilterConfig {
    pub fn engine(&self) -> FilterEngine {
        FilterEngine::new(&self.include, &self.exclude)
    }
}

/// Relay configuration.
#[derive(Debug)]
pub struct RelayConfig {
    pub bot_token: SecretString,
    /// Channel every post goes to.
    pub target: ChannelId,
    /// Source channels in rotation order, duplicates removed.
    pub sources: Vec<ChannelId>,
    /// Wait after each successful post.
    pub post_delay: Duration,
    pub filter: FilterConfig,
    pub footer: Footer,
    /// JSON file mirroring posted fingerprints.
    pub state_path: PathBuf,
    pub dedup_cap: usize,
    /// Recent messages fetched per channel visit.
    pub window_size: usize,
    /// Positions examined per channel visit.
    pub scan_budget: usize,
    /// Target messages fingerprinted at startup.
    pub bootstrap_limit: usize,
    /// Wait after a tick that did nothing.
    pub idle_wait: Duration,
    /// Directory for daily-rolling log files; stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl RelayConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let require = |key: &str| get(key).ok_or_else(|| ConfigError::MissingEnvVar(key.into()));

        let bot_token = SecretString::from(require("TELEGRAM_BOT_TOKEN")?);
        let target = ChannelId::parse(&require("TARGET_CHANNEL_ID")?)?;
        let sources = parse_sources(&require("SOURCE_CHANNELS")?, &target)?;

        let post_delay = Duration::from_secs(parse_or(
            get("POST_DELAY"),
            "POST_DELAY",
            DEFAULT_POST_DELAY_SECS,
        )?);

        let filter = FilterConfig {
            include: split_list(get("KEYWORDS_FILTER").as_deref()),
            exclude: split_list(get("EXCLUDE_WORDS").as_deref()),
        };

        let footer = Footer {
            label: get("FOOTER_LABEL").unwrap_or_else(|| DEFAULT_FOOTER_LABEL.to_string()),
            link_text: get("FOOTER_LINK_TEXT")
                .unwrap_or_else(|| DEFAULT_FOOTER_LINK_TEXT.to_string()),
            url: match get("FOOTER_URL") {
                Some(url) => url,
                None => default_footer_url(&target)
                    .ok_or_else(|| ConfigError::MissingEnvVar("FOOTER_URL".into()))?,
            },
        };

        let state_path = PathBuf::from(
            get("RELAY_STATE_PATH").unwrap_or_else(|| DEFAULT_STATE_PATH.to_string()),
        );

        let dedup_cap = positive(
            "RELAY_DEDUP_CAP",
            parse_or(get("RELAY_DEDUP_CAP"), "RELAY_DEDUP_CAP", DEFAULT_DEDUP_CAP)?,
        )?;
        let window_size = positive(
            "RELAY_WINDOW_SIZE",
            parse_or(get("RELAY_WINDOW_SIZE"), "RELAY_WINDOW_SIZE", DEFAULT_WINDOW_SIZE)?,
        )?;
        let scan_budget = positive(
            "RELAY_SCAN_BUDGET",
            parse_or(get("RELAY_SCAN_BUDGET"), "RELAY_SCAN_BUDGET", DEFAULT_SCAN_BUDGET)?,
        )?;
        let bootstrap_limit = parse_or(
            get("RELAY_BOOTSTRAP_LIMIT"),
            "RELAY_BOOTSTRAP_LIMIT",
            DEFAULT_BOOTSTRAP_LIMIT,
        )?;
        let idle_wait = Duration::from_secs(parse_or(
            get("RELAY_IDLE_SECS"),
            "RELAY_IDLE_SECS",
            DEFAULT_IDLE_WAIT.as_secs(),
        )?);

        Ok(Self {
            bot_token,
            target,
            sources,
            post_delay,
            filter,
            footer,
            state_path,
            dedup_cap,
            window_size,
            scan_budget,
            bootstrap_limit,
            idle_wait,
            log_dir: get("RELAY_LOG_DIR").map(PathBuf::from),
        })
    }
}

fn parse_sources(raw: &str, target: &ChannelId) -> Result<Vec<ChannelId>, ConfigError> {
    let mut sources: Vec<ChannelId> = Vec::new();
    for reference in split_list(Some(raw)) {
        let channel = ChannelId::parse(&reference)?;
        if &channel == target {
            return Err(ConfigError::InvalidValue {
                key: "SOURCE_CHANNELS".into(),
                message: format!("{channel} is also the target channel"),
            });
        }
        if !sources.contains(&channel) {
            sources.push(channel);
        }
    }

    if sources.is_empty() {
        return Err(ConfigError::MissingEnvVar("SOURCE_CHANNELS".into()));
    }
    Ok(sources)
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("{v:?}: {e}"),
        }),
    }
}

fn positive(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.into(),
            message: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

/// Public link for a target given by handle.
fn default_footer_url(target: &ChannelId) -> Option<String> {
    target
        .is_handle()
        .then(|| format!("https://t.me/{}", target.as_str().trim_start_matches('@')))
}
