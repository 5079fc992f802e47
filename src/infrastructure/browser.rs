//! Browser session abstraction
//!
//! Everything the crawler does against the remote checklist application goes
//! through [`PageSession`]. Elements are addressed by a [`Locator`] (a CSS
//! selector optionally narrowed by text content) and an index among matches.

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::{PipelineError, SessionResult};
use crate::infrastructure::config::{BrowserConfig, LaunchStrategy};

/// Text constraint on a locator's matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMatch {
    /// Trimmed text content equals the value
    Exact(String),
    /// Text content contains the value
    Contains(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub css: String,
    pub text: Option<TextMatch>,
}

impl Locator {
    pub fn css(css: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            text: None,
        }
    }

    /// Matches whose own text, or a descendant's, equals `text`.
    pub fn with_exact_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            text: Some(TextMatch::Exact(text.into())),
        }
    }

    pub fn with_text(css: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            css: css.into(),
            text: Some(TextMatch::Contains(text.into())),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.text {
            None => write!(f, "{}", self.css),
            Some(TextMatch::Exact(t)) => write!(f, "{} [text={:?}]", self.css, t),
            Some(TextMatch::Contains(t)) => write!(f, "{} [text~={:?}]", self.css, t),
        }
    }
}

/// Scroll geometry of a container element.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn at_bottom(&self, tolerance: f64) -> bool {
        self.scroll_top + self.client_height >= self.scroll_height - tolerance
    }
}

/// One live page of the remote application.
#[async_trait]
pub trait PageSession: Send + Sync {
    async fn goto(&self, url: &str, timeout: Duration) -> SessionResult<()>;

    /// Number of current matches, zero when absent.
    async fn count(&self, locator: &Locator) -> SessionResult<usize>;
    /// Waits until the first match is visible.
    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> SessionResult<()>;

    async fn click(&self, locator: &Locator, nth: usize) -> SessionResult<()>;
    async fn fill(&self, locator: &Locator, value: &str) -> SessionResult<()>;
    async fn press_key(&self, key: &str) -> SessionResult<()>;
    async fn scroll_into_view(&self, locator: &Locator, nth: usize) -> SessionResult<()>;

    async fn text_of(&self, locator: &Locator, nth: usize) -> SessionResult<String>;
    /// Text of every match, in document order.
    async fn texts_of(&self, locator: &Locator) -> SessionResult<Vec<String>>;
    async fn input_value(&self, locator: &Locator) -> SessionResult<String>;
    async fn has_class(&self, locator: &Locator, nth: usize, class: &str) -> SessionResult<bool>;
    async fn is_disabled(&self, locator: &Locator) -> SessionResult<bool>;

    /// For every `row` match, the label text of the first `label` inside it,
    /// or `None` when the row is not rendered visibly.
    async fn sample_rows(&self, row: &str, label: &str) -> SessionResult<Vec<Option<String>>>;

    async fn scroll_metrics(&self, container: &str) -> SessionResult<ScrollMetrics>;
    async fn set_scroll_top(&self, container: &str, top: f64) -> SessionResult<()>;
    async fn scroll_by(&self, container: &str, delta: f64) -> SessionResult<()>;

    async fn close(&self) -> SessionResult<()>;
}

/// Resolved launch parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub strategy: LaunchStrategy,
    pub profile_dir: Option<PathBuf>,
    pub headless: bool,
}

impl LaunchPlan {
    /// Resolves the configured strategy. CI runners cannot complete the
    /// interactive login and are rejected here.
    pub fn from_config(config: &BrowserConfig) -> Result<Self, PipelineError> {
        Self::for_strategy(config, config.strategy.resolve())
    }

    pub fn for_strategy(config: &BrowserConfig, strategy: LaunchStrategy) -> Result<Self, PipelineError> {
        match strategy {
            LaunchStrategy::Ci => Err(PipelineError::EnvironmentUnsupported(
                "interactive login required, not supported on CI runners".to_string(),
            )),
            LaunchStrategy::Hosted => Ok(Self {
                strategy,
                profile_dir: Some(config.hosted_profile_dir.clone()),
                headless: true,
            }),
            LaunchStrategy::Local | LaunchStrategy::Auto => Ok(Self {
                strategy: LaunchStrategy::Local,
                profile_dir: config
                    .local_profile_dir
                    .clone()
                    .or_else(|| dirs::data_local_dir().map(|d| d.join("checklist-crawler").join("browser-profile"))),
                headless: config.headless,
            }),
        }
    }
}

/// Produces a fresh page session for a run.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, plan: &LaunchPlan) -> Result<Box<dyn PageSession>, PipelineError>;
}
