use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use thirtyfour::prelude::*;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::forms::{FieldTarget, FieldWriter};

/// Read access to the page the panel is attached to.
#[async_trait]
pub trait Page: Send + Sync {
    async fn current_url(&self) -> Result<String>;
    async fn html(&self) -> Result<String>;
}

/// Sets the value, then fires bubbling input/change/blur so the host page's
/// own listeners pick the write up.
const WRITE_FIELD_SCRIPT: &str = r#"
const form = document.forms[arguments[0]];
if (!form) { return false; }
const field = form.querySelectorAll('input, textarea, select')[arguments[1]];
if (!field) { return false; }
field.focus();
field.value = arguments[2];
for (const type of ['input', 'change', 'blur']) {
    field.dispatchEvent(new Event(type, { bubbles: true }));
}
return true;
"#;

/// A live browser tab driven over WebDriver.
pub struct WebDriverPage {
    driver: WebDriver,
}

impl WebDriverPage {
    pub async fn connect(webdriver_url: &str, headless: bool) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();
        if headless {
            caps.set_headless()?;
        }
        let driver = WebDriver::new(webdriver_url, caps)
            .await
            .with_context(|| format!("Failed to connect to WebDriver at {}", webdriver_url))?;
        Ok(Self { driver })
    }

    pub async fn open(&self, url: &str) -> Result<()> {
        info!("Navigating to: {}", url);
        self.driver
            .goto(url)
            .await
            .with_context(|| format!("Failed to navigate to {}", url))?;
        Ok(())
    }

    pub async fn quit(self) -> Result<()> {
        self.driver.quit().await.context("Failed to close browser")?;
        Ok(())
    }
}

#[async_trait]
impl Page for WebDriverPage {
    async fn current_url(&self) -> Result<String> {
        let url = self
            .driver
            .current_url()
            .await
            .context("Failed to read current URL")?;
        Ok(url.to_string())
    }

    async fn html(&self) -> Result<String> {
        self.driver.source().await.context("Failed to read page source")
    }
}

#[async_trait]
impl FieldWriter for WebDriverPage {
    async fn write_field(&self, target: &FieldTarget, value: &str) -> Result<()> {
        let ret = self
            .driver
            .execute(
                WRITE_FIELD_SCRIPT,
                vec![
                    serde_json::json!(target.form_index),
                    serde_json::json!(target.control_index),
                    serde_json::json!(value),
                ],
            )
            .await
            .with_context(|| format!("Failed to fill field '{}'", target.name))?;

        if ret.json().as_bool() != Some(true) {
            return Err(anyhow!(
                "Field '{}' (form #{}, control #{}) is no longer on the page",
                target.name,
                target.form_index,
                target.control_index
            ));
        }
        debug!("filled '{}'", target.name);
        Ok(())
    }
}

/// One programmatic write and the events that followed it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub target: FieldTarget,
    pub value: String,
    pub events: Vec<&'static str>,
}

/// A page held in memory: fetched HTML, a file, or a test fixture. Writes
/// are recorded rather than applied.
pub struct StaticPage {
    url: Mutex<String>,
    html: Mutex<String>,
    writes: Mutex<Vec<RecordedWrite>>,
}

impl StaticPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: Mutex::new(url.into()),
            html: Mutex::new(html.into()),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Download `url` and wrap the response body. Without `timeout` the
    /// transport default applies.
    pub async fn fetch(url: &str, timeout: Option<Duration>) -> Result<Self> {
        info!("Fetching {}", url);
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        let response = client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("Failed to fetch {}", url))?;
        let html = response.text().await.context("Failed to read page body")?;
        Ok(Self::new(url, html))
    }

    /// Simulate client-side navigation.
    #[cfg(test)]
    pub async fn navigate(&self, url: impl Into<String>, html: impl Into<String>) {
        *self.url.lock().await = url.into();
        *self.html.lock().await = html.into();
    }

    pub async fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().await.clone()
    }
}

#[async_trait]
impl Page for StaticPage {
    async fn current_url(&self) -> Result<String> {
        Ok(self.url.lock().await.clone())
    }

    async fn html(&self) -> Result<String> {
        Ok(self.html.lock().await.clone())
    }
}

#[async_trait]
impl FieldWriter for StaticPage {
    async fn write_field(&self, target: &FieldTarget, value: &str) -> Result<()> {
        self.writes.lock().await.push(RecordedWrite {
            target: target.clone(),
            value: value.to_string(),
            events: vec!["input", "change", "blur"],
        });
        Ok(())
    }
}

/// Polls the page URL and reports client-side navigations once the new page
/// has had `settle_delay` to render.
pub struct NavigationWatcher {
    poll_interval: Duration,
    settle_delay: Duration,
    last_url: Option<String>,
}

impl NavigationWatcher {
    pub fn new(poll_interval: Duration, settle_delay: Duration) -> Self {
        Self {
            poll_interval,
            settle_delay,
            last_url: None,
        }
    }

    /// Returns the new URL if it differs from the one seen last time. The
    /// first call only records the starting URL.
    pub async fn check<P: Page + ?Sized>(&mut self, page: &P) -> Result<Option<String>> {
        let url = page.current_url().await?;
        match self.last_url.replace(url.clone()) {
            Some(previous) if previous != url => Ok(Some(url)),
            _ => Ok(None),
        }
    }

    /// Run until the page can no longer be read, calling `on_change` after
    /// each navigation has settled.
    pub async fn run<P, F>(mut self, page: &P, mut on_change: F) -> Result<()>
    where
        P: Page + ?Sized,
        F: FnMut(&str) + Send,
    {
        loop {
            if let Some(url) = self.check(page).await? {
                debug!("navigation to {}, settling", url);
                tokio::time::sleep(self.settle_delay).await;
                on_change(&url);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
