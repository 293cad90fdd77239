use crate::graph::RetryDelay;
use crate::{Error, Result};
use chrono::Duration as ChronoDuration;
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://graph.facebook.com";
pub const DEFAULT_API_VERSION: &str = "v10.0";

/// How far back insight series are requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightsWindow {
    Day,
    Week,
    Month,
    Trimester,
    Year,
}

impl InsightsWindow {
    pub fn lookback(self) -> ChronoDuration {
        match self {
            Self::Day => ChronoDuration::days(1),
            Self::Week => ChronoDuration::weeks(1),
            Self::Month => ChronoDuration::days(30),
            Self::Trimester => ChronoDuration::days(90),
            Self::Year => ChronoDuration::days(365),
        }
    }
}

impl FromStr for InsightsWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "trimester" => Ok(Self::Trimester),
            "year" => Ok(Self::Year),
            other => Err(Error::InvalidInput(format!(
                "unknown insights window '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_tracing(self) -> tracing::Level {
        match self {
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warning => tracing::Level::WARN,
            // tracing has no level above ERROR.
            Self::Error | Self::Critical => tracing::Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARNING" | "WARN" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            "CRITICAL" => Ok(Self::Critical),
            other => Err(Error::InvalidInput(format!("unknown log level '{other}'"))),
        }
    }
}

/// Which branches of the ingestion tree are walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadToggles {
    pub pages: bool,
    pub page_posts: bool,
    pub page_insights: bool,
    pub page_post_attachments: bool,
    pub page_post_insights: bool,
}

impl Default for LoadToggles {
    fn default() -> Self {
        Self {
            pages: true,
            page_posts: true,
            page_insights: true,
            page_post_attachments: true,
            page_post_insights: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphSettings {
    pub base_url: String,
    pub version: String,
    pub connections_limit: usize,
    pub delay_per_request: Duration,
    pub retry_attempts: u32,
    pub retry_delay: RetryDelay,
    pub request_timeout: Duration,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            version: DEFAULT_API_VERSION.to_string(),
            connections_limit: 1,
            delay_per_request: Duration::ZERO,
            retry_attempts: 3,
            retry_delay: RetryDelay::Expo,
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotifySettings {
    pub webhook_url: Option<String>,
    pub webhook_timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogSettings {
    pub file: Option<PathBuf>,
    pub file_level: LogLevel,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            file: None,
            file_level: LogLevel::Info,
        }
    }
}

/// Process configuration for one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub load: LoadToggles,
    pub access_tokens: Vec<String>,
    pub insights_for: InsightsWindow,
    pub graph: GraphSettings,
    pub db_url: String,
    pub notify: NotifySettings,
    pub log: LogSettings,
}

impl Settings {
    #[tracing::instrument(level = "debug")]
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let flag = |name: &str, default: bool| -> Result<bool> {
            match var(name) {
                Some(v) => parse_bool(&v)
                    .ok_or_else(|| Error::InvalidInput(format!("{name} is not a boolean: {v}"))),
                None => Ok(default),
            }
        };

        let load = LoadToggles {
            pages: flag("LOAD_PAGES", true)?,
            page_posts: flag("LOAD_PAGE_POSTS", true)?,
            page_insights: flag("LOAD_PAGE_INSIGHTS", true)?,
            page_post_attachments: flag("LOAD_PAGE_POST_ATTACHMENTS", true)?,
            page_post_insights: flag("LOAD_PAGE_POST_INSIGHTS", true)?,
        };

        let access_tokens = match var("FB_PAGES_ACCESS_TOKENS") {
            Some(v) => parse_tokens(&v)?,
            None => Vec::new(),
        };

        let insights_for = var("FB_PAGES_INSIGHTS_FOR")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(InsightsWindow::Day);

        let defaults = GraphSettings::default();
        let connections_limit = var("FB_PAGES_CONNECTIONS_LIMIT")
            .map(|v| parse_number::<usize>("FB_PAGES_CONNECTIONS_LIMIT", &v))
            .transpose()?
            .unwrap_or(defaults.connections_limit);
        let delay_secs = var("FB_PAGES_DELAY_PER_REQUEST")
            .map(|v| parse_number::<f64>("FB_PAGES_DELAY_PER_REQUEST", &v))
            .transpose()?
            .unwrap_or(0.0);
        if !delay_secs.is_finite() || delay_secs < 0.0 {
            return Err(Error::InvalidInput(format!(
                "FB_PAGES_DELAY_PER_REQUEST must be non negative, not {delay_secs}"
            )));
        }
        let retry_attempts = var("FB_PAGES_RETRY_ATTEMPTS")
            .map(|v| parse_number::<u32>("FB_PAGES_RETRY_ATTEMPTS", &v))
            .transpose()?
            .unwrap_or(defaults.retry_attempts);
        let retry_delay = var("FB_PAGES_RETRY_DELAY_FUNCTION")
            .map(|v| v.parse())
            .transpose()?
            .unwrap_or(defaults.retry_delay);
        let timeout_secs = var("FB_PAGES_REQUEST_TIMEOUT_SECS")
            .map(|v| parse_number::<u64>("FB_PAGES_REQUEST_TIMEOUT_SECS", &v))
            .transpose()?
            .unwrap_or(defaults.request_timeout.as_secs());

        let graph = GraphSettings {
            base_url: var("FB_PAGES_BASE_URL").unwrap_or(defaults.base_url),
            version: var("FB_PAGES_VERSION").unwrap_or(defaults.version),
            connections_limit,
            delay_per_request: Duration::from_secs_f64(delay_secs),
            retry_attempts,
            retry_delay,
            request_timeout: Duration::from_secs(timeout_secs),
        };

        let db_url = var("DB_URL").ok_or_else(|| Error::InvalidInput("DB_URL is required".into()))?;

        let webhook_timeout_ms = var("NOTIFY_WEBHOOK_TIMEOUT_MS")
            .map(|v| parse_number::<u64>("NOTIFY_WEBHOOK_TIMEOUT_MS", &v))
            .transpose()?
            .unwrap_or(10_000);
        let notify = NotifySettings {
            webhook_url: var("NOTIFY_WEBHOOK_URL"),
            webhook_timeout: Duration::from_millis(webhook_timeout_ms),
        };

        let log = LogSettings {
            file: var("LOG_FILE").map(PathBuf::from),
            file_level: var("LOG_FILE_LEVEL")
                .map(|v| v.parse())
                .transpose()?
                .unwrap_or(LogLevel::Info),
        };

        let settings = Self {
            load,
            access_tokens,
            insights_for,
            graph,
            db_url,
            notify,
            log,
        };
        settings.validate()?;
        Ok(settings)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn validate(&self) -> Result<()> {
        if self.graph.connections_limit == 0 {
            return Err(Error::InvalidInput(
                "graph.connections_limit must be > 0".to_string(),
            ));
        }
        if self.graph.request_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "graph.request_timeout must be > 0".to_string(),
            ));
        }
        if self.graph.version.trim().is_empty() {
            return Err(Error::InvalidInput("graph.version is empty".to_string()));
        }
        reqwest::Url::parse(&self.graph.base_url).map_err(|e| {
            Error::InvalidInput(format!("graph.base_url is not a url: {e}"))
        })?;
        if self.db_url.trim().is_empty() {
            return Err(Error::InvalidInput("db_url is empty".to_string()));
        }
        if let Some(url) = &self.notify.webhook_url {
            reqwest::Url::parse(url).map_err(|e| {
                Error::InvalidInput(format!("notify.webhook_url is not a url: {e}"))
            })?;
        }
        if self.notify.webhook_timeout.is_zero() {
            return Err(Error::InvalidInput(
                "notify.webhook_timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// JSON view with secrets masked, for `pagesync config`.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            let tokens: Vec<String> = self.access_tokens.iter().map(|t| redact(t)).collect();
            obj.insert("access_tokens".into(), serde_json::json!(tokens));
            obj.insert("db_url".into(), serde_json::json!(redact(&self.db_url)));
        }
        value
    }
}

fn redact(s: &str) -> String {
    if s.len() <= 8 {
        return "***".to_string();
    }
    match (s.get(..4), s.get(s.len() - 4..)) {
        (Some(head), Some(tail)) => format!("{head}***{tail}"),
        _ => "***".to_string(),
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn parse_number<T: FromStr>(name: &str, v: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    v.trim()
        .parse::<T>()
        .map_err(|e| Error::InvalidInput(format!("{name}: {e}")))
}

/// Tokens come either as a JSON array or a comma separated list.
fn parse_tokens(v: &str) -> Result<Vec<String>> {
    let trimmed = v.trim();
    let tokens: Vec<String> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
            .map_err(|e| Error::InvalidInput(format!("FB_PAGES_ACCESS_TOKENS: {e}")))?
    } else {
        trimmed.split(',').map(|t| t.trim().to_string()).collect()
    };
    Ok(tokens.into_iter().filter(|t| !t.is_empty()).collect())
}
