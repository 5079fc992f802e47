//! Session preparation against the remote checklist application
//!
//! Login, checklist navigation, facet (status, month) selection and logout.
//! All of it runs on the single page of the run.

#![allow(clippy::uninlined_format_args)]

use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::domain::{PipelineError, SessionResult};
use crate::infrastructure::browser::{Locator, PageSession};
use crate::infrastructure::config::{AreaCredentials, RemoteAppConfig, selectors};

const LOGIN_MARKER_WAIT: Duration = Duration::from_secs(5);
const LOGIN_SETTLE: Duration = Duration::from_secs(3);
const LOGIN_FORM_WAIT: Duration = Duration::from_secs(60);
const CHECKLIST_WAIT: Duration = Duration::from_secs(30);
const OPTION_WAIT: Duration = Duration::from_secs(10);
const FILTER_PANEL_SETTLE: Duration = Duration::from_millis(1500);
const OPTION_SETTLE: Duration = Duration::from_millis(500);
const FILTER_SAVE_SETTLE: Duration = Duration::from_secs(3);
const LOGOUT_STEP_SETTLE: Duration = Duration::from_secs(2);
const LOGOUT_CONFIRM_SETTLE: Duration = Duration::from_secs(3);

/// The status and month currently applied to the checklist table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facet {
    pub status: String,
    pub month: String,
}

pub struct RemoteSession<'a> {
    page: &'a dyn PageSession,
    app: &'a RemoteAppConfig,
    applied: Option<Facet>,
}

impl<'a> RemoteSession<'a> {
    pub const fn new(page: &'a dyn PageSession, app: &'a RemoteAppConfig) -> Self {
        Self {
            page,
            app,
            applied: None,
        }
    }

    pub const fn page(&self) -> &'a dyn PageSession {
        self.page
    }

    pub async fn open(&self) -> SessionResult<()> {
        info!("🌐 Opening checklist application...");
        self.page.goto(&self.app.app_url, self.app.navigation_timeout()).await
    }

    pub async fn reload(&self) -> SessionResult<()> {
        info!("🔄 Reloading page...");
        self.page.goto(&self.app.app_url, self.app.navigation_timeout()).await
    }

    pub async fn is_logged_in(&self) -> bool {
        self.page
            .wait_for_visible(&Locator::css(selectors::LOGGED_IN_MARKER), LOGIN_MARKER_WAIT)
            .await
            .is_ok()
    }

    /// Logs in through the application's own form.
    ///
    /// Skipped when the checklist control is already present. An identity
    /// provider chooser in place of the form is `EnvironmentUnsupported`.
    pub async fn login(&mut self, area: &str, credentials: &AreaCredentials) -> Result<(), PipelineError> {
        info!("🔐 Attempting to login...");
        info!("   👤 Area: {}", area);
        info!("   👤 Username: {}", credentials.username);
        sleep(LOGIN_SETTLE).await;

        if self.page.count(&Locator::css(selectors::CHECKLIST_BUTTON)).await? > 0 {
            info!("✅ Already logged in (checklist button found)");
            return Ok(());
        }

        let login_button = Locator::css(selectors::LOGIN_BUTTON);
        if self.page.count(&login_button).await? == 0 {
            error!("❌ Provider selection screen detected!");
            return Err(PipelineError::EnvironmentUnsupported(
                "login requires an identity-provider selection".to_string(),
            ));
        }

        self.page.click(&login_button, 0).await?;
        let username = Locator::css(selectors::USERNAME_INPUT);
        self.page.wait_for_visible(&username, LOGIN_FORM_WAIT).await?;
        self.page.fill(&username, &credentials.username).await?;
        self.page
            .fill(&Locator::css(selectors::PASSWORD_INPUT), &credentials.password)
            .await?;
        self.page
            .click(&Locator::with_text(selectors::SUBMIT_BUTTON, selectors::SUBMIT_LABEL), 0)
            .await?;

        info!("   ⏳ Waiting for navigation menu...");
        self.page
            .wait_for_visible(&Locator::css(selectors::NAVIGATION_MENU), LOGIN_FORM_WAIT)
            .await?;
        self.applied = None;
        info!("✅ Login success for area: {}", area);
        Ok(())
    }

    pub async fn navigate_to_checklist(&self) -> SessionResult<()> {
        info!("🔎 Opening checklist view...");
        self.page.click(&Locator::css(selectors::CHECKLIST_BUTTON), 0).await?;
        self.page
            .wait_for_visible(&Locator::css(selectors::FILTER_BUTTON), CHECKLIST_WAIT)
            .await?;
        info!("✅ Checklist view open");
        Ok(())
    }

    /// Scopes the table to `status` and `month`. A no-op when that facet is
    /// already applied.
    pub async fn apply_filter(&mut self, status: &str, month: &str) -> SessionResult<()> {
        let facet = Facet {
            status: status.to_string(),
            month: month.to_string(),
        };
        if self.applied.as_ref() == Some(&facet) {
            info!("🔧 Filter {} - {} already applied", status, month);
            return Ok(());
        }

        info!("🔧 Applying filter: {} - {}", status, month);
        // A failed attempt leaves the panel in an unknown state.
        self.applied = None;

        self.page.click(&Locator::css(selectors::FILTER_BUTTON), 0).await?;
        sleep(FILTER_PANEL_SETTLE).await;

        self.select_option(status).await?;
        self.select_option(month).await?;

        let save = Locator::with_text(selectors::SAVE_BUTTON, selectors::SAVE_LABEL);
        self.page.wait_for_visible(&save, OPTION_WAIT).await?;
        self.page.click(&save, 0).await?;
        sleep(FILTER_SAVE_SETTLE).await;

        self.applied = Some(facet);
        info!("  ✅ Filter applied");
        Ok(())
    }

    /// Clicks a filter option unless it is already selected.
    async fn select_option(&self, label: &str) -> SessionResult<()> {
        let option = Locator::with_exact_text(selectors::SELECT_BUTTON, label);
        self.page.wait_for_visible(&option, OPTION_WAIT).await?;
        if !self.page.has_class(&option, 0, selectors::SELECTED_CLASS).await? {
            self.page.click(&option, 0).await?;
        }
        sleep(OPTION_SETTLE).await;
        Ok(())
    }

    /// Best-effort logout. Failures are logged, never returned.
    pub async fn logout(&mut self) {
        info!("🚪 Logging out...");
        match self.try_logout().await {
            Ok(()) => info!("✅ Logout success"),
            Err(e) => warn!("❌ Logout error: {}", e),
        }
        self.applied = None;
    }

    async fn try_logout(&self) -> SessionResult<()> {
        self.page.click(&Locator::css(selectors::MENU_BUTTON), 0).await?;
        sleep(LOGOUT_STEP_SETTLE).await;
        self.page.click(&Locator::css(selectors::LOGOUT_ACTION), 0).await?;
        sleep(LOGOUT_STEP_SETTLE).await;
        self.page.click(&Locator::css(selectors::LOGOUT_CONFIRM), 0).await?;
        sleep(LOGOUT_CONFIRM_SETTLE).await;
        Ok(())
    }
}
