//! Infrastructure layer: configuration, logging, the browser session and the
//! datastore API client, plus the per-run progress broadcaster.

pub mod api_client;
pub mod browser;
pub mod config;
pub mod csv_backup;
pub mod logging;
pub mod run_broadcaster;
pub mod webdriver;

pub use api_client::ApiClient;
pub use browser::{BrowserLauncher, LaunchPlan, Locator, PageSession, ScrollMetrics, TextMatch};
pub use config::{AppConfig, ConfigError, LaunchStrategy, defaults, selectors};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};
pub use run_broadcaster::{RunBroadcaster, RunEventSink, RunSubscription};
pub use webdriver::{WebDriverLauncher, WebDriverSession};
