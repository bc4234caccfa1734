#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use browser_agent::brain::{DecisionOracle, OracleRequest};
use browser_agent::hands::{LoadStrategy, Page, PageError};
use browser_agent::types::ElementCategory;

/// In-memory page that records every side effect it is asked for.
#[derive(Default)]
pub struct FakePage {
    pub closed: bool,
    pub url: Mutex<String>,
    pub title: String,
    pub markup: String,
    pub buttons: Vec<String>,
    pub links: Vec<String>,
    pub inputs: Vec<BTreeMap<String, String>>,
    /// Every navigation hangs this long before finishing.
    pub navigate_delay: Option<Duration>,
    /// Full-load navigations fail; DOM-ready ones succeed.
    pub fail_full_load: bool,
    pub fail_buttons: bool,
    pub fail_title: bool,
    /// Clicks on existing elements are refused.
    pub refuse_clicks: bool,
    pub calls: Mutex<Vec<String>>,
}

impl FakePage {
    pub fn at(url: &str) -> Self {
        Self {
            url: Mutex::new(url.to_string()),
            ..Default::default()
        }
    }

    pub fn with_buttons(mut self, count: usize) -> Self {
        self.buttons = (0..count).map(|i| format!("Button {i}")).collect();
        self
    }

    pub fn with_inputs(mut self, count: usize) -> Self {
        self.inputs = (0..count)
            .map(|i| BTreeMap::from([("name".to_string(), format!("field{i}"))]))
            .collect();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn count(&self, category: ElementCategory) -> usize {
        match category {
            ElementCategory::Link => self.links.len(),
            ElementCategory::Button => self.buttons.len(),
            ElementCategory::Input => self.inputs.len(),
        }
    }
}

#[async_trait]
impl Page for FakePage {
    fn is_open(&self) -> bool {
        !self.closed
    }

    async fn navigate(&self, url: &str, strategy: LoadStrategy) -> Result<(), PageError> {
        self.log(format!("navigate {strategy:?} {url}"));
        if let Some(delay) = self.navigate_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_full_load && strategy == LoadStrategy::Load {
            return Err(PageError::Backend("net::ERR_SOCKET_NOT_CONNECTED".into()));
        }
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn click(&self, category: ElementCategory, index: usize) -> Result<(), PageError> {
        self.log(format!("click {category} {index}"));
        if index >= self.count(category) {
            return Err(PageError::ElementGone { category, index });
        }
        if self.refuse_clicks {
            return Err(PageError::Backend("element is not interactable".into()));
        }
        Ok(())
    }

    async fn type_into(&self, index: usize, text: &str) -> Result<(), PageError> {
        self.log(format!("type {index} {text}"));
        Ok(())
    }

    async fn scroll(&self, delta: i64) -> Result<(), PageError> {
        self.log(format!("scroll {delta}"));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), PageError> {
        self.log(format!("press {key}"));
        Ok(())
    }

    async fn sleep(&self, duration: Duration) {
        self.log(format!("sleep {}ms", duration.as_millis()));
    }

    async fn current_url(&self) -> Result<String, PageError> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn title(&self) -> Result<String, PageError> {
        if self.fail_title {
            return Err(PageError::Backend("title unavailable".into()));
        }
        Ok(self.title.clone())
    }

    async fn markup(&self) -> Result<String, PageError> {
        Ok(self.markup.clone())
    }

    async fn count_elements(&self, category: ElementCategory) -> Result<usize, PageError> {
        Ok(self.count(category))
    }

    async fn element_texts(&self, category: ElementCategory) -> Result<Vec<String>, PageError> {
        match category {
            ElementCategory::Button if self.fail_buttons => {
                Err(PageError::Backend("buttons unavailable".into()))
            }
            ElementCategory::Button => Ok(self.buttons.clone()),
            ElementCategory::Link => Ok(self.links.clone()),
            ElementCategory::Input => Ok(Vec::new()),
        }
    }

    async fn input_attributes(
        &self,
        _names: &[&str],
    ) -> Result<Vec<BTreeMap<String, String>>, PageError> {
        Ok(self.inputs.clone())
    }
}

/// Oracle that replays canned responses and remembers what it was asked.
#[derive(Default)]
pub struct ScriptedOracle {
    responses: Mutex<VecDeque<Result<String, String>>>,
    pub requests: Mutex<Vec<OracleRequest>>,
}

impl ScriptedOracle {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(|r| Ok(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Oracle whose only answer is a transport failure.
    pub fn failing(message: &str) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([Err(message.to_string())])),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<OracleRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionOracle for ScriptedOracle {
    async fn complete(&self, request: &OracleRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("script exhausted")),
        }
    }
}
