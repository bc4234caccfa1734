use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::types::ElementCategory;

const SETTLE: Duration = Duration::from_millis(300);
const TYPE_SETTLE: Duration = Duration::from_millis(200);
const VIEWPORT: (u32, u32) = (1280, 800);

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error("browser session is not started")]
    NotStarted,
    #[error("{category} #{index} is no longer on the page")]
    ElementGone {
        category: ElementCategory,
        index: usize,
    },
    #[error("browser automation failed: {0}")]
    Backend(String),
}

impl PageError {
    fn backend(err: impl std::fmt::Display) -> Self {
        PageError::Backend(format!("{err:#}"))
    }
}

/// How long `navigate` waits before calling the load finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Full `load` event.
    Load,
    /// Stop once the document body exists.
    DomContentLoaded,
}

/// Everything the agent needs from a live page. One run at a time.
#[async_trait]
pub trait Page: Send + Sync {
    /// Whether the handle is usable at all.
    fn is_open(&self) -> bool {
        true
    }

    async fn navigate(&self, url: &str, strategy: LoadStrategy) -> Result<(), PageError>;
    async fn click(&self, category: ElementCategory, index: usize) -> Result<(), PageError>;
    /// Clears the input at `index` and types `text` into it.
    async fn type_into(&self, index: usize, text: &str) -> Result<(), PageError>;
    /// Positive `delta` scrolls down.
    async fn scroll(&self, delta: i64) -> Result<(), PageError>;
    async fn press_key(&self, key: &str) -> Result<(), PageError>;

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    async fn current_url(&self) -> Result<String, PageError>;
    async fn title(&self) -> Result<String, PageError>;
    async fn markup(&self) -> Result<String, PageError>;
    async fn count_elements(&self, category: ElementCategory) -> Result<usize, PageError>;
    /// Raw text content of every element in `category`, in document order.
    async fn element_texts(&self, category: ElementCategory) -> Result<Vec<String>, PageError>;
    /// The requested attributes of every input, in document order. Absent
    /// attributes are left out of the map.
    async fn input_attributes(
        &self,
        names: &[&str],
    ) -> Result<Vec<BTreeMap<String, String>>, PageError>;
}

/// Chrome session driven over the DevTools protocol. Created once and
/// reused by every task until closed.
pub struct BrowserSession {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

#[derive(Debug, Clone, Default)]
pub struct LaunchConfig {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub connect: Option<String>,
    pub persistent_profile: bool,
}

impl BrowserSession {
    /// Blocking; call from `spawn_blocking`.
    pub fn launch(config: &LaunchConfig) -> Result<Self> {
        if let Some(ws_url) = &config.connect {
            info!(%ws_url, "attaching to running Chrome");
            let browser = Browser::connect(ws_url.clone())
                .with_context(|| format!("could not attach to Chrome at {ws_url}"))?;
            let existing = browser
                .get_tabs()
                .lock()
                .map_err(|_| anyhow::anyhow!("Chrome tab list lock poisoned"))?
                .first()
                .cloned();
            let tab = match existing {
                Some(tab) => tab,
                None => browser.new_tab()?,
            };
            return Ok(Self {
                browser: Some(browser),
                tab: Some(tab),
            });
        }

        let user_data_dir = if config.persistent_profile {
            let dir = profile_dir()?;
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("could not create profile dir {}", dir.display()))?;
            debug!(profile = %dir.display(), "using persistent profile");
            Some(dir)
        } else {
            None
        };

        let options = LaunchOptions {
            headless: config.headless,
            path: config.chrome_path.clone(),
            user_data_dir,
            window_size: Some(VIEWPORT),
            args: vec![
                OsStr::new("--no-first-run"),
                OsStr::new("--no-default-browser-check"),
                OsStr::new("--disable-infobars"),
            ],
            idle_browser_timeout: Duration::from_secs(600),
            ..Default::default()
        };

        info!(headless = config.headless, "launching Chrome");
        let browser = Browser::new(options).context("Chrome launch failed")?;
        let tab = browser.new_tab()?;
        tab.navigate_to("about:blank")?;
        info!("Chrome ready");

        Ok(Self {
            browser: Some(browser),
            tab: Some(tab),
        })
    }

    /// Drops the tab and the browser process. Later runs fail their precondition.
    pub fn close(&mut self) {
        if let Some(tab) = self.tab.take() {
            if let Err(err) = tab.close(false) {
                warn!("closing tab failed: {err:#}");
            }
        }
        self.browser = None;
    }

    /// Runs a blocking DevTools call off the async runtime.
    async fn with_tab<T, F>(&self, op: F) -> Result<T, PageError>
    where
        T: Send + 'static,
        F: FnOnce(&Tab) -> Result<T, PageError> + Send + 'static,
    {
        let tab = self.tab.clone().ok_or(PageError::NotStarted)?;
        tokio::task::spawn_blocking(move || op(tab.as_ref()))
            .await
            .map_err(|err| PageError::Backend(format!("automation task panicked: {err}")))?
    }
}

fn profile_dir() -> Result<PathBuf> {
    let base = dirs::data_local_dir().context("no local data directory on this platform")?;
    Ok(base.join("browser-agent").join("profile"))
}

fn js_string(raw: &str) -> String {
    serde_json::Value::String(raw.to_string()).to_string()
}

/// Evaluates an expression that returns `JSON.stringify(...)` and decodes it.
fn evaluate_json<T: DeserializeOwned>(tab: &Tab, expression: &str) -> Result<T, PageError> {
    let result = tab.evaluate(expression, false).map_err(PageError::backend)?;
    let raw = result
        .value
        .and_then(|v| v.as_str().map(String::from))
        .ok_or_else(|| PageError::Backend("script returned no value".into()))?;
    serde_json::from_str(&raw).map_err(PageError::backend)
}

#[async_trait]
impl Page for BrowserSession {
    fn is_open(&self) -> bool {
        self.tab.is_some()
    }

    async fn navigate(&self, url: &str, strategy: LoadStrategy) -> Result<(), PageError> {
        let url = url.to_string();
        self.with_tab(move |tab| {
            tab.navigate_to(&url).map_err(PageError::backend)?;
            match strategy {
                LoadStrategy::Load => {
                    tab.wait_until_navigated().map_err(PageError::backend)?;
                }
                LoadStrategy::DomContentLoaded => {
                    tab.wait_for_element("body").map_err(PageError::backend)?;
                }
            }
            std::thread::sleep(SETTLE);
            Ok(())
        })
        .await
    }

    async fn click(&self, category: ElementCategory, index: usize) -> Result<(), PageError> {
        self.with_tab(move |tab| {
            let elements = tab.find_elements(category.selector()).unwrap_or_default();
            let element = elements
                .get(index)
                .ok_or(PageError::ElementGone { category, index })?;
            element.click().map_err(PageError::backend)?;
            std::thread::sleep(SETTLE);
            Ok(())
        })
        .await
    }

    async fn type_into(&self, index: usize, text: &str) -> Result<(), PageError> {
        let text = text.to_string();
        self.with_tab(move |tab| {
            let category = ElementCategory::Input;
            let elements = tab.find_elements(category.selector()).unwrap_or_default();
            let element = elements
                .get(index)
                .ok_or(PageError::ElementGone { category, index })?;
            element
                .call_js_fn(
                    "function () { if ('value' in this) { this.value = ''; } }",
                    vec![],
                    false,
                )
                .map_err(PageError::backend)?;
            element.type_into(&text).map_err(PageError::backend)?;
            std::thread::sleep(TYPE_SETTLE);
            Ok(())
        })
        .await
    }

    async fn scroll(&self, delta: i64) -> Result<(), PageError> {
        self.with_tab(move |tab| {
            tab.evaluate(&format!("window.scrollBy(0, {delta})"), false)
                .map_err(PageError::backend)?;
            std::thread::sleep(SETTLE);
            Ok(())
        })
        .await
    }

    async fn press_key(&self, key: &str) -> Result<(), PageError> {
        let key = key.to_string();
        self.with_tab(move |tab| {
            tab.press_key(&key).map_err(PageError::backend)?;
            std::thread::sleep(SETTLE);
            Ok(())
        })
        .await
    }

    async fn current_url(&self) -> Result<String, PageError> {
        self.with_tab(|tab| Ok(tab.get_url())).await
    }

    async fn title(&self) -> Result<String, PageError> {
        self.with_tab(|tab| tab.get_title().map_err(PageError::backend))
            .await
    }

    async fn markup(&self) -> Result<String, PageError> {
        self.with_tab(|tab| tab.get_content().map_err(PageError::backend))
            .await
    }

    async fn count_elements(&self, category: ElementCategory) -> Result<usize, PageError> {
        self.with_tab(move |tab| {
            let expression = format!(
                "document.querySelectorAll({}).length",
                js_string(category.selector())
            );
            let result = tab.evaluate(&expression, false).map_err(PageError::backend)?;
            let count = result.value.and_then(|v| v.as_u64()).unwrap_or(0);
            Ok(count as usize)
        })
        .await
    }

    async fn element_texts(&self, category: ElementCategory) -> Result<Vec<String>, PageError> {
        self.with_tab(move |tab| {
            let expression = format!(
                "JSON.stringify(Array.from(document.querySelectorAll({}), el => el.textContent || ''))",
                js_string(category.selector())
            );
            evaluate_json(tab, &expression)
        })
        .await
    }

    async fn input_attributes(
        &self,
        names: &[&str],
    ) -> Result<Vec<BTreeMap<String, String>>, PageError> {
        let names = serde_json::to_string(names).map_err(PageError::backend)?;
        self.with_tab(move |tab| {
            let expression = format!(
                r#"JSON.stringify(Array.from(document.querySelectorAll({selector}), el => {{
                    const attrs = {{}};
                    for (const name of {names}) {{
                        const value = el.getAttribute(name);
                        if (value !== null) attrs[name] = value;
                    }}
                    return attrs;
                }}))"#,
                selector = js_string(ElementCategory::Input.selector()),
            );
            evaluate_json(tab, &expression)
        })
        .await
    }
}
