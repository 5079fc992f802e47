//! Configuration infrastructure
//!
//! Settings are layered with the `config` crate:
//! 1. Built-in defaults (the [`defaults`] module)
//! 2. An optional configuration file (`config/default.*` or an explicit path)
//! 3. Environment variables prefixed with `CRAWLER`, `__` between sections
//!    (e.g. `CRAWLER__API__BATCH_SIZE=25`)
//!
//! Per-area credentials additionally fall back to the deployment's
//! `<AREA>_USERNAME` / `<AREA>_PASSWORD` variables.

#![allow(clippy::uninlined_format_args)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Configuration validation failed: {message}")]
    Validation { message: String },
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub app: RemoteAppConfig,
    pub harvest: HarvestConfig,
    pub reconcile: ReconcileConfig,
    pub sync: SyncConfig,
    pub browser: BrowserConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
    /// Reporting year sent with every batch; the current year when unset.
    pub year: Option<i32>,
}

/// Central datastore API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub ingest_path: String,
    pub approved_path: String,
    /// Bound on a single delivery request
    pub request_timeout_secs: u64,
    /// Records per delivery batch
    pub batch_size: usize,
    /// Retries after the initial attempt
    pub max_retries: u32,
    /// Delay before each retry, in order
    pub retry_delays_ms: Vec<u64>,
}

/// The remote checklist application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteAppConfig {
    pub app_url: String,
    pub navigation_timeout_secs: u64,
    pub areas: Vec<String>,
    pub credentials: HashMap<String, AreaCredentials>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AreaCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AreaCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Phase-1 list harvesting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub statuses: Vec<String>,
    pub months: Vec<String>,
    pub scroll_step_px: f64,
    pub scroll_delay_ms: u64,
    pub action_delay_ms: u64,
    pub max_scroll_iterations: u32,
    pub bottom_tolerance_px: f64,
    /// Consecutive at-bottom iterations before the final sample
    pub stability_threshold: u32,
}

/// Phase-2 reconciliation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub max_scroll_iterations: u32,
    /// Consecutive scroll iterations without a match before giving up
    pub stall_threshold: u32,
    pub month_change_attempts: u32,
    /// Extra wait on top of the harvest scroll delay
    pub extra_scroll_delay_ms: u64,
}

/// Remote replication wait
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub initial_settle_ms: u64,
}

/// How a browser session is obtained for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchStrategy {
    /// Detect from `CI`/`GITHUB_ACTIONS` and `RENDER`
    Auto,
    /// Persistent profile on a workstation
    Local,
    /// Persistent profile inside a hosted container
    Hosted,
    /// CI runner; cannot complete the interactive login
    Ci,
}

impl LaunchStrategy {
    /// Resolves `Auto` against the process environment.
    pub fn resolve(self) -> Self {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if self != Self::Auto {
            return self;
        }
        let flag = |name: &str| lookup(name).is_some_and(|v| v == "true");
        if flag("CI") || flag("GITHUB_ACTIONS") {
            Self::Ci
        } else if flag("RENDER") {
            Self::Hosted
        } else {
            Self::Local
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub strategy: LaunchStrategy,
    pub webdriver_url: String,
    pub headless: bool,
    pub local_profile_dir: Option<PathBuf>,
    pub hosted_profile_dir: PathBuf,
    /// Wait after logout so the remote application can flush
    pub post_logout_wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub csv_backup: bool,
    pub backup_dir: PathBuf,
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs for the file output
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Directory for log files; next to the executable when unset
    pub log_dir: Option<PathBuf>,

    /// Log file name
    pub file_name: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::API_BASE_URL.to_string(),
            api_key: None,
            ingest_path: defaults::INGEST_PATH.to_string(),
            approved_path: defaults::APPROVED_PATH.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            batch_size: defaults::BATCH_SIZE,
            max_retries: defaults::MAX_RETRIES,
            retry_delays_ms: defaults::RETRY_DELAYS_MS.to_vec(),
        }
    }
}

impl Default for RemoteAppConfig {
    fn default() -> Self {
        Self {
            app_url: defaults::APP_URL.to_string(),
            navigation_timeout_secs: defaults::NAVIGATION_TIMEOUT_SECS,
            areas: defaults::AREAS.iter().map(|s| s.to_string()).collect(),
            credentials: HashMap::new(),
        }
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            statuses: defaults::STATUSES.iter().map(|s| s.to_string()).collect(),
            months: defaults::MONTHS.iter().map(|s| s.to_string()).collect(),
            scroll_step_px: defaults::SCROLL_STEP_PX,
            scroll_delay_ms: defaults::SCROLL_DELAY_MS,
            action_delay_ms: defaults::ACTION_DELAY_MS,
            max_scroll_iterations: defaults::HARVEST_MAX_SCROLL_ITERATIONS,
            bottom_tolerance_px: defaults::BOTTOM_TOLERANCE_PX,
            stability_threshold: defaults::STABILITY_THRESHOLD,
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_scroll_iterations: defaults::RECONCILE_MAX_SCROLL_ITERATIONS,
            stall_threshold: defaults::STALL_THRESHOLD,
            month_change_attempts: defaults::MONTH_CHANGE_ATTEMPTS,
            extra_scroll_delay_ms: defaults::RECONCILE_EXTRA_SCROLL_DELAY_MS,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::SYNC_TIMEOUT_SECS,
            poll_interval_ms: defaults::SYNC_POLL_INTERVAL_MS,
            initial_settle_ms: defaults::SYNC_INITIAL_SETTLE_MS,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            strategy: LaunchStrategy::Auto,
            webdriver_url: defaults::WEBDRIVER_URL.to_string(),
            headless: true,
            local_profile_dir: None,
            hosted_profile_dir: PathBuf::from(defaults::HOSTED_PROFILE_DIR),
            post_logout_wait_secs: defaults::POST_LOGOUT_WAIT_SECS,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_backup: true,
            backup_dir: PathBuf::from(defaults::BACKUP_DIR),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            log_dir: None,
            file_name: defaults::LOG_FILE_NAME.to_string(),
        }
    }
}

impl ApiConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_ms.iter().copied().map(Duration::from_millis).collect()
    }
}

impl HarvestConfig {
    pub const fn scroll_delay(&self) -> Duration {
        Duration::from_millis(self.scroll_delay_ms)
    }

    pub const fn action_delay(&self) -> Duration {
        Duration::from_millis(self.action_delay_ms)
    }
}

impl SyncConfig {
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn initial_settle(&self) -> Duration {
        Duration::from_millis(self.initial_settle_ms)
    }
}

impl RemoteAppConfig {
    pub const fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    /// Credentials for `area` from config, else from `<AREA>_USERNAME`/`<AREA>_PASSWORD`.
    pub fn credentials_for(&self, area: &str) -> Option<AreaCredentials> {
        self.credentials_for_with(area, |name| std::env::var(name).ok())
    }

    pub fn credentials_for_with<F>(&self, area: &str, lookup: F) -> Option<AreaCredentials>
    where
        F: Fn(&str) -> Option<String>,
    {
        // The config crate lowercases environment-sourced keys.
        let configured = self
            .credentials
            .get(area)
            .or_else(|| self.credentials.get(&area.to_lowercase()))
            .or_else(|| self.credentials.get(&area.to_uppercase()))
            .cloned();

        let creds = configured.or_else(|| {
            let prefix = area.to_uppercase();
            Some(AreaCredentials {
                username: lookup(&format!("{prefix}_USERNAME"))?,
                password: lookup(&format!("{prefix}_PASSWORD"))?,
            })
        })?;

        (!creds.username.trim().is_empty() && !creds.password.is_empty()).then_some(creds)
    }
}

impl BrowserConfig {
    pub const fn post_logout_wait(&self) -> Duration {
        Duration::from_secs(self.post_logout_wait_secs)
    }
}

impl AppConfig {
    /// Layered load: defaults, optional file, then `CRAWLER__*` environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let defaults = config::Config::try_from(&Self::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path)),
            None => builder.add_source(config::File::with_name(defaults::CONFIG_FILE_STEM).required(false)),
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix("CRAWLER")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("app.areas")
                    .with_list_parse_key("harvest.statuses")
                    .with_list_parse_key("harvest.months")
                    .with_list_parse_key("api.retry_delays_ms")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Self = settings.try_deserialize()?;
        config.apply_legacy_env(|name| std::env::var(name).ok());
        config.validate()?;

        info!("✅ Configuration loaded (api: {}, areas: {:?})", config.api.base_url, config.app.areas);
        Ok(config)
    }

    /// Deployment variables used before the layered config existed.
    pub fn apply_legacy_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.api.api_key.is_none() {
            self.api.api_key = lookup("CRAWLER_API_KEY").filter(|k| !k.is_empty());
        }
        if self.api.base_url == defaults::API_BASE_URL {
            if let Some(url) = lookup("NEXTJS_API_URL").filter(|u| !u.is_empty()) {
                self.api.base_url = url;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |message: String| Err(ConfigError::Validation { message });

        if self.api.batch_size == 0 {
            return fail("api.batch_size must be greater than 0".to_string());
        }
        if self.api.retry_delays_ms.len() < self.api.max_retries as usize {
            return fail(format!(
                "api.retry_delays_ms has {} entries but api.max_retries is {}",
                self.api.retry_delays_ms.len(),
                self.api.max_retries
            ));
        }
        if self.api.request_timeout_secs == 0 {
            return fail("api.request_timeout_secs must be greater than 0".to_string());
        }
        if self.harvest.statuses.is_empty() || self.harvest.months.is_empty() {
            return fail("harvest.statuses and harvest.months must not be empty".to_string());
        }
        for status in &self.harvest.statuses {
            if status.parse::<crate::domain::PhaseOneStatus>().is_err() {
                return fail(format!("harvest.statuses contains unknown status {status}"));
            }
        }
        if self.harvest.scroll_step_px <= 0.0 {
            return fail("harvest.scroll_step_px must be positive".to_string());
        }
        if self.harvest.stability_threshold == 0 || self.reconcile.stall_threshold == 0 {
            return fail("stability and stall thresholds must be at least 1".to_string());
        }
        if self.reconcile.month_change_attempts == 0 {
            return fail("reconcile.month_change_attempts must be at least 1".to_string());
        }
        Ok(())
    }

    /// Year sent with every batch.
    pub fn reporting_year(&self) -> i32 {
        use chrono::Datelike;
        self.year.unwrap_or_else(|| chrono::Local::now().year())
    }
}

/// Default configuration values
pub mod defaults {
    pub const CONFIG_FILE_STEM: &str = "config/default";

    pub const API_BASE_URL: &str = "http://localhost:3000";
    pub const INGEST_PATH: &str = "/batches";
    pub const APPROVED_PATH: &str = "/approved";
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    pub const BATCH_SIZE: usize = 50;
    pub const MAX_RETRIES: u32 = 3;
    pub const RETRY_DELAYS_MS: [u64; 3] = [2000, 4000, 8000];

    pub const APP_URL: &str = "https://www.appsheet.com/start/c08488d5-d2b3-4411-b6cc-8f387c028e7c?platform=desktop#appName=SLAMtes-320066460";
    pub const NAVIGATION_TIMEOUT_SECS: u64 = 60;
    pub const AREAS: [&str; 4] = ["BANDUNG", "CORPU", "PRIANGAN_BARAT", "PRIANGAN_TIMUR"];

    pub const STATUSES: [&str; 3] = ["OPEN", "SUBMITTED", "APPROVED"];
    pub const MONTHS: [&str; 3] = ["JUL", "AGU", "SEP"];
    pub const SCROLL_STEP_PX: f64 = 400.0;
    pub const SCROLL_DELAY_MS: u64 = 600;
    pub const ACTION_DELAY_MS: u64 = 1500;
    pub const HARVEST_MAX_SCROLL_ITERATIONS: u32 = 150;
    pub const BOTTOM_TOLERANCE_PX: f64 = 10.0;
    pub const STABILITY_THRESHOLD: u32 = 5;

    pub const RECONCILE_MAX_SCROLL_ITERATIONS: u32 = 200;
    pub const STALL_THRESHOLD: u32 = 30;
    pub const MONTH_CHANGE_ATTEMPTS: u32 = 3;
    pub const RECONCILE_EXTRA_SCROLL_DELAY_MS: u64 = 200;

    pub const SYNC_TIMEOUT_SECS: u64 = 120;
    pub const SYNC_POLL_INTERVAL_MS: u64 = 3000;
    pub const SYNC_INITIAL_SETTLE_MS: u64 = 2000;

    pub const WEBDRIVER_URL: &str = "http://localhost:9515";
    pub const HOSTED_PROFILE_DIR: &str = "/app/playwright-data";
    pub const POST_LOGOUT_WAIT_SECS: u64 = 120;

    pub const BACKUP_DIR: &str = "./crawl_data";

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_FILE_NAME: &str = "checklist-crawler.log";
}

/// CSS selectors and labels of the remote checklist application
pub mod selectors {
    /// Scroll container of the virtualized checklist
    pub const TABLE_LIST: &str = ".TableView__list";
    pub const TABLE_ROW: &str = r#"span[data-testid="table-view-row"]"#;
    pub const ROW_LABEL: &str = r#"span[data-testid="text-type-display-span"]"#;

    pub const UNSYNCED_BADGE: &str = r#"span.c-jss137.c-jss134.c-jss146 span[role="status"][aria-label*="Unsynced"]"#;
    pub const SYNC_STATUS_TEXT: &str = r#"span[data-testid="SyncStatusText"][role="status"]"#;
    pub const SYNC_BUTTON: &str = r#"button[data-testid="SyncActionButton"]"#;
    pub const SYNCING_MARKER: &str = "Syncing";

    pub const LOGGED_IN_MARKER: &str = r#"span[data-testonly-action="logout"]"#;
    pub const CHECKLIST_BUTTON: &str = r#"div[role="button"] i.fa-check"#;
    pub const LOGIN_BUTTON: &str = r#"[data-testid="Login"]"#;
    pub const USERNAME_INPUT: &str = r#"input[aria-label="Username"]"#;
    pub const PASSWORD_INPUT: &str = r#"input[aria-label="Password"]"#;
    pub const SUBMIT_BUTTON: &str = "button";
    pub const SUBMIT_LABEL: &str = "Login";
    pub const NAVIGATION_MENU: &str = r#"ul[role="navigation"]"#;

    pub const FILTER_BUTTON: &str = r#"button[aria-label="Filter checklist"]"#;
    pub const SELECT_BUTTON: &str = r#"span[data-testid="button-select-button"]"#;
    pub const SELECTED_CLASS: &str = "ButtonSelectButton--selected";
    pub const SAVE_BUTTON: &str = "button";
    pub const SAVE_LABEL: &str = "Save";

    pub const DETAIL_MAIN: &str = ".SlideshowPage__main";
    pub const DETAIL_HEADER: &str = r#"[data-testid="slideshow-page-header"] span[data-testid="text-type-display-span"]"#;
    pub const MONTH_INPUT: &str = r#"input[aria-label="Bulan"]"#;
    pub const DROPDOWN_OPTION: &str = r#"li[role="option"]"#;
    pub const PERIOD_OPTION_LABEL: &str = "E2130";
    /// Present only while the second-period approval is still pending
    pub const SECONDARY_APPROVAL_BUTTON: &str = r#"button[aria-label="CL Kelas"]"#;

    pub const MENU_BUTTON: &str = r#"div[role="button"][title="Menu"]:has(i.fa-th)"#;
    pub const LOGOUT_ACTION: &str = "div.GenericActionButton__paddington:has(i.fa-sign-out)";
    pub const LOGOUT_CONFIRM: &str = r#"button[aria-label="logout"].btn-danger"#;

    pub const ESCAPE_KEY: &str = "Escape";
}
