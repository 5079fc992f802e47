//! W3C WebDriver implementation of [`PageSession`]
//!
//! Talks to a chromedriver-compatible endpoint over HTTP. Element lookups
//! run as page scripts so that text-narrowed locators and visibility checks
//! behave the same for every operation.

#![allow(clippy::uninlined_format_args)]

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::domain::{PipelineError, SessionError, SessionResult};
use crate::infrastructure::browser::{BrowserLauncher, LaunchPlan, Locator, PageSession, ScrollMetrics, TextMatch};
use crate::infrastructure::config::LaunchStrategy;

const VISIBILITY_POLL: Duration = Duration::from_millis(100);

/// Shared lookup helpers prepended to every element script.
/// `arguments[0..3]` are `css`, match mode (`null`, `"exact"`, `"contains"`) and text.
const PRELUDE: &str = r"
const __find = (css, mode, text) => {
  const all = Array.from(document.querySelectorAll(css));
  if (!mode) return all;
  const norm = (el) => (el.textContent || '').trim();
  return all.filter((el) => {
    if (mode === 'contains') return norm(el).includes(text);
    if (norm(el) === text) return true;
    return Array.from(el.querySelectorAll('*')).some((d) => norm(d) === text);
  });
};
const __visible = (el) => {
  if (!el || !el.getClientRects().length) return false;
  const style = window.getComputedStyle(el);
  return style.visibility !== 'hidden' && style.display !== 'none';
};
const __m = __find(arguments[0], arguments[1], arguments[2]);
";

fn locator_args(locator: &Locator) -> Vec<Value> {
    match &locator.text {
        None => vec![json!(locator.css), Value::Null, Value::Null],
        Some(TextMatch::Exact(t)) => vec![json!(locator.css), json!("exact"), json!(t)],
        Some(TextMatch::Contains(t)) => vec![json!(locator.css), json!("contains"), json!(t)],
    }
}

/// Maps a W3C error payload to a session error.
fn map_driver_error(value: &Value) -> SessionError {
    let code = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match code {
        "no such element" | "stale element reference" => SessionError::ElementNotFound(message),
        "timeout" | "script timeout" => SessionError::InteractionTimeout {
            what: message,
            timeout_ms: 0,
        },
        "javascript error" => SessionError::Script(message),
        other => SessionError::Driver(format!("{}: {}", other, message)),
    }
}

fn key_code(key: &str) -> String {
    match key {
        "Escape" => "\u{E00C}".to_string(),
        "Enter" => "\u{E007}".to_string(),
        "Tab" => "\u{E004}".to_string(),
        other => other.to_string(),
    }
}

async fn send_command(client: &Client, method: Method, url: &str, body: Option<Value>) -> SessionResult<Value> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.map_err(|e| SessionError::Driver(e.to_string()))?;
    let payload: Value = response.json().await.map_err(|e| SessionError::Driver(e.to_string()))?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if value.get("error").is_some() {
        return Err(map_driver_error(&value));
    }
    Ok(value)
}

/// Starts sessions on a chromedriver endpoint.
pub struct WebDriverLauncher {
    client: Client,
    endpoint: String,
}

impl WebDriverLauncher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn capabilities(plan: &LaunchPlan) -> Value {
        let mut args = vec!["--window-size=1366,900".to_string(), "--disable-gpu".to_string()];
        if plan.headless {
            args.push("--headless=new".to_string());
        }
        if plan.strategy == LaunchStrategy::Hosted {
            args.push("--no-sandbox".to_string());
            args.push("--disable-dev-shm-usage".to_string());
        }
        if let Some(dir) = &plan.profile_dir {
            args.push(format!("--user-data-dir={}", dir.display()));
        }

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self, plan: &LaunchPlan) -> Result<Box<dyn PageSession>, PipelineError> {
        if let Some(dir) = &plan.profile_dir {
            tokio::fs::create_dir_all(dir).await?;
        }

        info!("🌐 Launching browser ({:?}, headless: {})", plan.strategy, plan.headless);
        let value = send_command(
            &self.client,
            Method::POST,
            &format!("{}/session", self.endpoint),
            Some(Self::capabilities(plan)),
        )
        .await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| SessionError::Driver("session response without sessionId".to_string()))?;
        debug!("WebDriver session {}", session_id);

        Ok(Box::new(WebDriverSession {
            client: self.client.clone(),
            base: format!("{}/session/{}", self.endpoint, session_id),
        }))
    }
}

pub struct WebDriverSession {
    client: Client,
    base: String,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> SessionResult<Value> {
        send_command(&self.client, method, &format!("{}{}", self.base, path), body).await
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> SessionResult<Value> {
        self.command(Method::POST, "/execute/sync", Some(json!({ "script": script, "args": args })))
            .await
    }

    /// Runs `body` after the lookup prelude; `arguments[3..]` are `extra`.
    async fn on_matches(&self, locator: &Locator, body: &str, extra: &[Value]) -> SessionResult<Value> {
        let mut args = locator_args(locator);
        args.extend_from_slice(extra);
        self.execute(&format!("{}{}", PRELUDE, body), args).await
    }

    async fn on_nth(&self, locator: &Locator, nth: usize, body: &str, extra: &[Value]) -> SessionResult<Value> {
        let mut args = vec![json!(nth)];
        args.extend_from_slice(extra);
        let script = format!("const __el = __m[arguments[3]]; if (!__el) return {{ missing: true }}; {}", body);
        let value = self.on_matches(locator, &script, &args).await?;
        if value.get("missing").and_then(Value::as_bool) == Some(true) {
            return Err(SessionError::ElementNotFound(format!("{} #{}", locator, nth)));
        }
        Ok(value)
    }
}

fn as_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl PageSession for WebDriverSession {
    async fn goto(&self, url: &str, timeout: Duration) -> SessionResult<()> {
        self.command(
            Method::POST,
            "/timeouts",
            Some(json!({ "pageLoad": u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX) })),
        )
        .await?;
        self.command(Method::POST, "/url", Some(json!({ "url": url }))).await?;
        Ok(())
    }

    async fn count(&self, locator: &Locator) -> SessionResult<usize> {
        let value = self.on_matches(locator, "return __m.length;", &[]).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn wait_for_visible(&self, locator: &Locator, timeout: Duration) -> SessionResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let visible = self.on_matches(locator, "return __visible(__m[0]);", &[]).await?;
            if visible.as_bool() == Some(true) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(SessionError::InteractionTimeout {
                    what: locator.to_string(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            sleep(VISIBILITY_POLL).await;
        }
    }

    async fn click(&self, locator: &Locator, nth: usize) -> SessionResult<()> {
        self.on_nth(locator, nth, "__el.scrollIntoView({ block: 'center' }); __el.click(); return {};", &[])
            .await?;
        Ok(())
    }

    async fn fill(&self, locator: &Locator, value: &str) -> SessionResult<()> {
        let body = r"
const proto = Object.getPrototypeOf(__el);
const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
__el.focus();
setter.call(__el, arguments[4]);
__el.dispatchEvent(new Event('input', { bubbles: true }));
__el.dispatchEvent(new Event('change', { bubbles: true }));
return {};";
        self.on_nth(locator, 0, body, &[json!(value)]).await?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> SessionResult<()> {
        let code = key_code(key);
        self.command(
            Method::POST,
            "/actions",
            Some(json!({
                "actions": [{
                    "type": "key",
                    "id": "keyboard",
                    "actions": [
                        { "type": "keyDown", "value": code },
                        { "type": "keyUp", "value": code }
                    ]
                }]
            })),
        )
        .await?;
        self.command(Method::DELETE, "/actions", None).await?;
        Ok(())
    }

    async fn scroll_into_view(&self, locator: &Locator, nth: usize) -> SessionResult<()> {
        self.on_nth(locator, nth, "__el.scrollIntoView({ block: 'center' }); return {};", &[])
            .await?;
        Ok(())
    }

    async fn text_of(&self, locator: &Locator, nth: usize) -> SessionResult<String> {
        let value = self
            .on_nth(locator, nth, "return { text: (__el.textContent || '').trim() };", &[])
            .await?;
        Ok(as_string(value.get("text").cloned().unwrap_or(Value::Null)))
    }

    async fn texts_of(&self, locator: &Locator) -> SessionResult<Vec<String>> {
        let value = self
            .on_matches(locator, "return __m.map((el) => (el.textContent || '').trim());", &[])
            .await?;
        Ok(value
            .as_array()
            .map(|items| items.iter().cloned().map(as_string).collect())
            .unwrap_or_default())
    }

    async fn input_value(&self, locator: &Locator) -> SessionResult<String> {
        let value = self.on_nth(locator, 0, "return { value: __el.value };", &[]).await?;
        Ok(as_string(value.get("value").cloned().unwrap_or(Value::Null)))
    }

    async fn has_class(&self, locator: &Locator, nth: usize, class: &str) -> SessionResult<bool> {
        let value = self
            .on_nth(locator, nth, "return { has: __el.classList.contains(arguments[4]) };", &[json!(class)])
            .await?;
        Ok(value.get("has").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn is_disabled(&self, locator: &Locator) -> SessionResult<bool> {
        let value = self
            .on_nth(
                locator,
                0,
                "return { disabled: !!__el.disabled || __el.getAttribute('aria-disabled') === 'true' };",
                &[],
            )
            .await?;
        Ok(value.get("disabled").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn sample_rows(&self, row: &str, label: &str) -> SessionResult<Vec<Option<String>>> {
        let script = format!(
            "{}return Array.from(document.querySelectorAll(arguments[3])).map((r) => {{
               if (!__visible(r)) return null;
               const l = r.querySelector(arguments[4]);
               return l ? l.textContent : null;
             }});",
            PRELUDE
        );
        let value = self
            .execute(&script, vec![json!("*:not(*)"), Value::Null, Value::Null, json!(row), json!(label)])
            .await?;
        Ok(value
            .as_array()
            .map(|items| items.iter().map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default())
    }

    async fn scroll_metrics(&self, container: &str) -> SessionResult<ScrollMetrics> {
        let value = self
            .execute(
                "const c = document.querySelector(arguments[0]);
                 if (!c) return null;
                 return { top: c.scrollTop, height: c.scrollHeight, client: c.clientHeight };",
                vec![json!(container)],
            )
            .await?;
        if value.is_null() {
            return Err(SessionError::ElementNotFound(container.to_string()));
        }
        let field = |name: &str| value.get(name).and_then(Value::as_f64).unwrap_or(0.0);
        Ok(ScrollMetrics {
            scroll_top: field("top"),
            scroll_height: field("height"),
            client_height: field("client"),
        })
    }

    async fn set_scroll_top(&self, container: &str, top: f64) -> SessionResult<()> {
        let found = self
            .execute(
                "const c = document.querySelector(arguments[0]); if (!c) return false; c.scrollTop = arguments[1]; return true;",
                vec![json!(container), json!(top)],
            )
            .await?;
        if found.as_bool() != Some(true) {
            return Err(SessionError::ElementNotFound(container.to_string()));
        }
        Ok(())
    }

    async fn scroll_by(&self, container: &str, delta: f64) -> SessionResult<()> {
        let found = self
            .execute(
                "const c = document.querySelector(arguments[0]); if (!c) return false; c.scrollTop += arguments[1]; return true;",
                vec![json!(container), json!(delta)],
            )
            .await?;
        if found.as_bool() != Some(true) {
            return Err(SessionError::ElementNotFound(container.to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> SessionResult<()> {
        if let Err(e) = self.command(Method::DELETE, "", None).await {
            warn!("⚠️ Failed to close browser session: {}", e);
            return Err(e);
        }
        debug!("WebDriver session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn driver_errors_map_to_session_errors() {
        let err = map_driver_error(&json!({ "error": "no such element", "message": "gone" }));
        assert_eq!(err, SessionError::ElementNotFound("gone".into()));
        let err = map_driver_error(&json!({ "error": "javascript error", "message": "boom" }));
        assert!(matches!(err, SessionError::Script(_)));
        let err = map_driver_error(&json!({ "error": "session not created", "message": "x" }));
        assert!(matches!(err, SessionError::Driver(_)));
    }

    #[test]
    fn hosted_capabilities_disable_sandbox() {
        let plan = LaunchPlan {
            strategy: LaunchStrategy::Hosted,
            profile_dir: Some(PathBuf::from("/app/profile")),
            headless: true,
        };
        let caps = WebDriverLauncher::capabilities(&plan);
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>();
        assert!(args.contains(&"--no-sandbox"));
        assert!(args.contains(&"--headless=new"));
        assert!(args.contains(&"--user-data-dir=/app/profile"));
    }

    #[tokio::test]
    async fn launch_and_count_against_driver() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": { "sessionId": "abc", "capabilities": {} } })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/session/abc/execute/sync"))
            .and(body_partial_json(json!({ "args": [".TableView__list", null, null] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": 3 })))
            .mount(&server)
            .await;

        let launcher = WebDriverLauncher::new(server.uri());
        let plan = LaunchPlan {
            strategy: LaunchStrategy::Local,
            profile_dir: None,
            headless: true,
        };
        let session = launcher.launch(&plan).await.unwrap();
        let count = session.count(&Locator::css(".TableView__list")).await.unwrap();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn missing_element_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/session/s1/execute/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": { "missing": true } })))
            .mount(&server)
            .await;

        let session = WebDriverSession {
            client: Client::new(),
            base: format!("{}/session/s1", server.uri()),
        };
        let err = session.click(&Locator::css("button.none"), 0).await.unwrap_err();
        assert!(matches!(err, SessionError::ElementNotFound(_)));
    }
}
