//! Scripted fakes for the browser session and the datastore API.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use checklist_crawler_lib::domain::batch::IngestSummary;
use checklist_crawler_lib::domain::{
    ApprovedItem, ApprovedSource, BatchPayload, BatchTransport, DeliveryError, IngestResponse, PhaseOneStatus,
    PhaseTwoStatus, PipelineError, SessionError, SessionResult, UpdateMode,
};
use checklist_crawler_lib::infrastructure::config::{AppConfig, AreaCredentials, LaunchStrategy, selectors};
use checklist_crawler_lib::infrastructure::{BrowserLauncher, LaunchPlan, Locator, PageSession, ScrollMetrics, TextMatch};

pub const ROW_HEIGHT: f64 = 40.0;
pub const VISIBLE_ROWS: usize = 10;
pub const MONTH_OPTIONS: [&str; 3] = ["JUL", "AGU", "SEP"];

#[derive(Debug, Default)]
pub struct PageState {
    pub logged_in: bool,
    pub provider_chooser: bool,
    pub login_form_open: bool,
    pub checklist_open: bool,
    pub filter_panel_open: bool,
    pub selected_status: Option<String>,
    pub selected_month: Option<String>,
    pub applied: Option<(String, String)>,
    /// Filter options that never render
    pub missing_options: HashSet<String>,
    pub saves: u32,
    /// Table content per (status, month)
    pub facets: HashMap<(String, String), Vec<String>>,
    pub rows: Vec<String>,
    pub scroll_top: f64,
    pub scroll_calls: u32,
    pub fail_scroll_after: Option<u32>,

    pub sync_stuck: bool,
    pub sync_broken: bool,
    /// Status text reads "Syncing" for this many more polls
    pub syncing_polls: u32,
    pub sync_button_disabled: bool,

    /// Row ids whose label cannot be read
    pub unreadable_rows: HashSet<String>,
    /// Whole-sample reads that fail before one succeeds
    pub failing_samples: u32,

    pub detail: Option<String>,
    pub detail_month: String,
    /// Month shown when a detail view opens; the facet month when unset
    pub detail_month_on_open: Option<String>,
    pub month_picker_stuck: bool,
    pub dropdown_open: bool,
    pub period_selected: bool,
    pub not_approved: HashSet<String>,
    pub broken_details: HashSet<String>,
    pub opened_details: Vec<String>,

    pub filled: Vec<(String, String)>,
    pub gotos: u32,
    pub logouts: u32,
    pub closed: bool,
}

impl PageState {
    fn max_scroll(&self) -> f64 {
        (self.rows.len() as f64 * ROW_HEIGHT - VISIBLE_ROWS as f64 * ROW_HEIGHT).max(0.0)
    }

    fn visible_rows(&self) -> Vec<String> {
        let start = (self.scroll_top / ROW_HEIGHT).floor() as usize;
        self.rows.iter().skip(start).take(VISIBLE_ROWS).cloned().collect()
    }

    fn option_visible(&self, label: &str) -> bool {
        if label == selectors::PERIOD_OPTION_LABEL {
            return self.detail.is_some();
        }
        self.filter_panel_open && !self.missing_options.contains(label)
    }

    fn option_selected(&self, label: &str) -> bool {
        if label == selectors::PERIOD_OPTION_LABEL {
            return self.period_selected;
        }
        self.selected_status.as_deref() == Some(label) || self.selected_month.as_deref() == Some(label)
    }

    fn detail_visible(&self) -> bool {
        self.detail.as_ref().is_some_and(|id| !self.broken_details.contains(id))
    }

    fn count(&self, locator: &Locator) -> usize {
        let text = match &locator.text {
            Some(TextMatch::Exact(t) | TextMatch::Contains(t)) => Some(t.as_str()),
            None => None,
        };
        let present = match (locator.css.as_str(), text) {
            (selectors::LOGGED_IN_MARKER, _) | (selectors::NAVIGATION_MENU, _) => self.logged_in,
            (selectors::CHECKLIST_BUTTON, _) => self.logged_in,
            (selectors::LOGIN_BUTTON, _) => !self.logged_in && !self.provider_chooser,
            (selectors::USERNAME_INPUT, _) | (selectors::PASSWORD_INPUT, _) => self.login_form_open,
            (selectors::FILTER_BUTTON, _) | (selectors::TABLE_LIST, _) => self.checklist_open,
            (selectors::UNSYNCED_BADGE, _) => self.sync_stuck,
            (selectors::SYNC_STATUS_TEXT, _) => self.syncing_polls > 0,
            (selectors::SYNC_BUTTON, _) => true,
            (selectors::SELECT_BUTTON, Some(label)) => self.option_visible(label),
            ("button", Some(selectors::SAVE_LABEL)) => self.filter_panel_open,
            ("button", Some(selectors::SUBMIT_LABEL)) => self.login_form_open,
            (selectors::TABLE_ROW, _) => return self.visible_rows().len(),
            (selectors::DETAIL_MAIN, _) | (selectors::DETAIL_HEADER, _) => self.detail_visible(),
            (selectors::MONTH_INPUT, _) => self.detail_visible(),
            (selectors::DROPDOWN_OPTION, _) => return if self.dropdown_open { MONTH_OPTIONS.len() } else { 0 },
            (selectors::SECONDARY_APPROVAL_BUTTON, _) => {
                self.detail.as_ref().is_some_and(|id| self.not_approved.contains(id))
            }
            (selectors::MENU_BUTTON, _) | (selectors::LOGOUT_ACTION, _) | (selectors::LOGOUT_CONFIRM, _) => {
                self.logged_in
            }
            _ => false,
        };
        usize::from(present)
    }
}

/// In-memory model of the checklist application.
#[derive(Clone, Default)]
pub struct FakePage {
    state: Arc<Mutex<PageState>>,
}

fn missing(locator: &Locator) -> SessionError {
    SessionError::ElementNotFound(locator.to_string())
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap()
    }

    pub fn with_facet(self, status: &str, month: &str, rows: Vec<String>) -> Self {
        self.state().facets.insert((status.to_string(), month.to_string()), rows);
        self
    }

    /// Table already filtered and open, for harvester-level tests.
    pub fn with_open_table(self, rows: &[String]) -> Self {
        {
            let mut s = self.state();
            s.logged_in = true;
            s.checklist_open = true;
            s.rows = rows.to_vec();
        }
        self
    }

    fn click_on(s: &mut PageState, locator: &Locator, nth: usize) -> SessionResult<()> {
        if s.count(locator) <= nth {
            return Err(missing(locator));
        }
        let text = match &locator.text {
            Some(TextMatch::Exact(t) | TextMatch::Contains(t)) => Some(t.clone()),
            None => None,
        };
        match (locator.css.as_str(), text.as_deref()) {
            (selectors::LOGIN_BUTTON, _) => s.login_form_open = true,
            ("button", Some(selectors::SUBMIT_LABEL)) => {
                s.login_form_open = false;
                s.logged_in = true;
            }
            (selectors::CHECKLIST_BUTTON, _) => s.checklist_open = true,
            (selectors::FILTER_BUTTON, _) => s.filter_panel_open = true,
            (selectors::SELECT_BUTTON, Some(label)) if label == selectors::PERIOD_OPTION_LABEL => {
                s.period_selected = true;
            }
            (selectors::SELECT_BUTTON, Some(label)) => {
                // Options toggle: clicking a selected one clears it.
                let slot = if label.parse::<PhaseOneStatus>().is_ok() {
                    &mut s.selected_status
                } else {
                    &mut s.selected_month
                };
                *slot = if slot.as_deref() == Some(label) { None } else { Some(label.to_string()) };
            }
            ("button", Some(selectors::SAVE_LABEL)) => {
                s.filter_panel_open = false;
                s.saves += 1;
                let facet = (
                    s.selected_status.clone().unwrap_or_default(),
                    s.selected_month.clone().unwrap_or_default(),
                );
                s.rows = s.facets.get(&facet).cloned().unwrap_or_default();
                s.scroll_top = 0.0;
                s.applied = Some(facet);
            }
            (selectors::TABLE_ROW, _) => {
                let label = s.visible_rows()[nth].clone();
                let id = label.split(" - ").next().unwrap_or_default().trim().to_string();
                s.opened_details.push(id.clone());
                s.detail_month = s
                    .detail_month_on_open
                    .clone()
                    .or_else(|| s.applied.as_ref().map(|(_, m)| m.clone()))
                    .unwrap_or_default();
                s.period_selected = false;
                s.detail = Some(id);
            }
            (selectors::MONTH_INPUT, _) => s.dropdown_open = true,
            (selectors::DROPDOWN_OPTION, _) => {
                s.dropdown_open = false;
                if !s.month_picker_stuck {
                    s.detail_month = MONTH_OPTIONS[nth].to_string();
                }
            }
            (selectors::LOGOUT_CONFIRM, _) => {
                s.logged_in = false;
                s.checklist_open = false;
                s.logouts += 1;
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl PageSession for FakePage {
    async fn goto(&self, _url: &str, _timeout: Duration) -> SessionResult<()> {
        let mut s = self.state();
        s.gotos += 1;
        s.checklist_open = false;
        s.filter_panel_open = false;
        Ok(())
    }

    async fn count(&self, locator: &Locator) -> SessionResult<usize> {
        let s = self.state();
        if s.sync_broken && locator.css == selectors::UNSYNCED_BADGE {
            return Err(SessionError::Driver("sync badge unreadable".into()));
        }
        Ok(s.count(locator))
    }

    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> SessionResult<()> {
        if self.state().count(locator) > 0 {
            Ok(())
        } else {
            Err(SessionError::InteractionTimeout {
                what: locator.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }

    async fn click(&self, locator: &Locator, nth: usize) -> SessionResult<()> {
        Self::click_on(&mut self.state(), locator, nth)
    }

    async fn fill(&self, locator: &Locator, value: &str) -> SessionResult<()> {
        let mut s = self.state();
        if s.count(locator) == 0 {
            return Err(missing(locator));
        }
        s.filled.push((locator.css.clone(), value.to_string()));
        Ok(())
    }

    async fn press_key(&self, _key: &str) -> SessionResult<()> {
        let mut s = self.state();
        if s.dropdown_open {
            s.dropdown_open = false;
        } else {
            s.detail = None;
        }
        Ok(())
    }

    async fn scroll_into_view(&self, locator: &Locator, nth: usize) -> SessionResult<()> {
        if self.state().count(locator) > nth { Ok(()) } else { Err(missing(locator)) }
    }

    async fn text_of(&self, locator: &Locator, nth: usize) -> SessionResult<String> {
        let mut s = self.state();
        match locator.css.as_str() {
            selectors::UNSYNCED_BADGE if s.sync_stuck => Ok("Unsynced changes (3)".into()),
            selectors::SYNC_STATUS_TEXT if s.syncing_polls > 0 => {
                s.syncing_polls -= 1;
                Ok(format!("{}...", selectors::SYNCING_MARKER))
            }
            selectors::DETAIL_HEADER if s.detail_visible() => Ok(format!("Gedung {}", s.detail.clone().unwrap_or_default())),
            selectors::TABLE_ROW => s.visible_rows().get(nth).cloned().ok_or_else(|| missing(locator)),
            _ => Err(missing(locator)),
        }
    }

    async fn texts_of(&self, locator: &Locator) -> SessionResult<Vec<String>> {
        let s = self.state();
        if locator.css == selectors::DROPDOWN_OPTION && s.dropdown_open {
            return Ok(MONTH_OPTIONS.iter().map(|m| format!("{m} 2025")).collect());
        }
        Ok(Vec::new())
    }

    async fn input_value(&self, locator: &Locator) -> SessionResult<String> {
        let s = self.state();
        if locator.css == selectors::MONTH_INPUT && s.detail_visible() {
            Ok(s.detail_month.clone())
        } else {
            Err(missing(locator))
        }
    }

    async fn has_class(&self, locator: &Locator, nth: usize, class: &str) -> SessionResult<bool> {
        let s = self.state();
        if s.count(locator) <= nth {
            return Err(missing(locator));
        }
        let label = match &locator.text {
            Some(TextMatch::Exact(t) | TextMatch::Contains(t)) => t.as_str(),
            None => return Ok(false),
        };
        Ok(class == selectors::SELECTED_CLASS && s.option_selected(label))
    }

    async fn is_disabled(&self, locator: &Locator) -> SessionResult<bool> {
        Ok(locator.css == selectors::SYNC_BUTTON && self.state().sync_button_disabled)
    }

    async fn sample_rows(&self, _row: &str, _label: &str) -> SessionResult<Vec<Option<String>>> {
        let mut s = self.state();
        if s.failing_samples > 0 {
            s.failing_samples -= 1;
            return Err(SessionError::Script("stale element reference".into()));
        }
        Ok(s.visible_rows()
            .into_iter()
            .map(|label| {
                let id = label.split(" - ").next().unwrap_or_default().trim();
                (!s.unreadable_rows.contains(id)).then_some(label)
            })
            .collect())
    }

    async fn scroll_metrics(&self, _container: &str) -> SessionResult<ScrollMetrics> {
        let s = self.state();
        Ok(ScrollMetrics {
            scroll_top: s.scroll_top,
            scroll_height: s.rows.len() as f64 * ROW_HEIGHT,
            client_height: VISIBLE_ROWS as f64 * ROW_HEIGHT,
        })
    }

    async fn set_scroll_top(&self, _container: &str, top: f64) -> SessionResult<()> {
        let mut s = self.state();
        s.scroll_top = top.clamp(0.0, s.max_scroll());
        Ok(())
    }

    async fn scroll_by(&self, _container: &str, delta: f64) -> SessionResult<()> {
        let mut s = self.state();
        s.scroll_calls += 1;
        if s.fail_scroll_after.is_some_and(|n| s.scroll_calls > n) {
            return Err(SessionError::Driver("target closed".into()));
        }
        s.scroll_top = (s.scroll_top + delta).clamp(0.0, s.max_scroll());
        Ok(())
    }

    async fn close(&self) -> SessionResult<()> {
        self.state().closed = true;
        Ok(())
    }
}

pub struct FakeLauncher {
    pub page: FakePage,
    pub launches: Mutex<Vec<LaunchPlan>>,
}

impl FakeLauncher {
    pub fn new(page: FakePage) -> Arc<Self> {
        Arc::new(Self {
            page,
            launches: Mutex::new(Vec::new()),
        })
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, plan: &LaunchPlan) -> Result<Box<dyn PageSession>, PipelineError> {
        self.launches.lock().unwrap().push(plan.clone());
        Ok(Box::new(self.page.clone()))
    }
}

#[derive(Debug, Clone)]
pub struct SentBatch {
    pub area: String,
    pub update_mode: UpdateMode,
    pub month: Option<String>,
    pub rows: Vec<(String, String, PhaseOneStatus, PhaseTwoStatus)>,
}

impl SentBatch {
    pub fn ids(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.1.as_str()).collect()
    }
}

/// Saves every row unless told to fail from a given call on.
#[derive(Default)]
pub struct FakeTransport {
    pub batches: Mutex<Vec<SentBatch>>,
    pub calls: Mutex<u32>,
    pub fail_from_call: Option<u32>,
}

impl FakeTransport {
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_from(call: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_from_call: Some(call),
            ..Self::default()
        })
    }

    pub fn sent(&self) -> Vec<SentBatch> {
        self.batches.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl BatchTransport for FakeTransport {
    async fn post_batch(&self, payload: &BatchPayload<'_>) -> Result<IngestResponse, DeliveryError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if self.fail_from_call.is_some_and(|n| call >= n) {
            return Err(DeliveryError::Transport("connection refused".into()));
        }
        self.batches.lock().unwrap().push(SentBatch {
            area: payload.area.to_string(),
            update_mode: payload.update_mode,
            month: payload.month.map(str::to_string),
            rows: payload
                .data
                .iter()
                .map(|r| (r.month.clone(), r.id.clone(), r.period_1_20, r.period_21_30))
                .collect(),
        });
        Ok(IngestResponse {
            success: true,
            summary: Some(IngestSummary {
                berhasil: payload.data.len() as u64,
            }),
            error: None,
        })
    }
}

pub struct FakeApproved {
    pub items: Option<Vec<ApprovedItem>>,
}

impl FakeApproved {
    pub fn with(items: Vec<ApprovedItem>) -> Arc<Self> {
        Arc::new(Self { items: Some(items) })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self { items: None })
    }
}

#[async_trait]
impl ApprovedSource for FakeApproved {
    async fn fetch_approved(&self, _area: &str) -> Result<Vec<ApprovedItem>, DeliveryError> {
        self.items
            .clone()
            .ok_or_else(|| DeliveryError::Rejected {
                status: 500,
                message: "Internal Server Error".into(),
            })
    }
}

pub fn approved(month: &str, id: &str, phase_two: Option<PhaseTwoStatus>) -> ApprovedItem {
    ApprovedItem {
        area: "BANDUNG".into(),
        month: month.into(),
        id_gedung: id.into(),
        name: format!("Gedung {id}"),
        kind: "T1".into(),
        period_1_20: Some(PhaseOneStatus::Approved),
        period_21_30: phase_two,
    }
}

pub fn label(id: &str) -> String {
    format!("{id} - Gedung {id} - T1")
}

pub fn labels(ids: impl IntoIterator<Item = usize>) -> Vec<String> {
    ids.into_iter().map(|i| label(&i.to_string())).collect()
}

/// Defaults with BANDUNG credentials, a local launch and no side files.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.app.credentials.insert(
        "BANDUNG".into(),
        AreaCredentials {
            username: "bandung.user".into(),
            password: "secret".into(),
        },
    );
    config.browser.strategy = LaunchStrategy::Local;
    config.browser.local_profile_dir = Some(std::env::temp_dir().join("checklist-crawler-test-profile"));
    config.output.csv_backup = false;
    config.year = Some(2025);
    config
}
