use std::{ffi::OsStr, sync::Arc};

use anyhow::{Context, Result};
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::debug;

use super::challenge::{BrowserCookie, BrowserDriver, BrowserLauncher};

/// Launches a local Chrome/Chromium through the DevTools protocol.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    pub headless: bool,
}

impl ChromeLauncher {
    pub fn new(headless: bool) -> Self {
        Self { headless }
    }
}

impl BrowserLauncher for ChromeLauncher {
    type Driver = ChromeDriver;

    fn launch(&self) -> Result<ChromeDriver> {
        let options = LaunchOptions::default_builder()
            .headless(self.headless)
            .window_size(Some((1920, 1080)))
            .args(vec![
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--no-first-run"),
            ])
            .build()
            .context("invalid browser launch options")?;
        let browser = Browser::new(options).context("failed to launch browser")?;
        let tab = browser.new_tab().context("failed to open browser tab")?;
        debug!(headless = self.headless, "browser launched");
        Ok(ChromeDriver {
            browser: Some(browser),
            tab: Some(tab),
        })
    }
}

pub struct ChromeDriver {
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
}

impl ChromeDriver {
    fn tab(&self) -> Result<&Arc<Tab>> {
        self.tab
            .as_ref()
            .context("browser tab already closed")
    }
}

impl BrowserDriver for ChromeDriver {
    fn navigate(&mut self, url: &str) -> Result<()> {
        self.tab()?
            .navigate_to(url)
            .with_context(|| format!("failed to navigate to {url}"))?;
        Ok(())
    }

    fn has_element(&mut self, selector: &str) -> Result<bool> {
        Ok(self.tab()?.find_element(selector).is_ok())
    }

    fn cookies(&mut self) -> Result<Vec<BrowserCookie>> {
        let cookies = self
            .tab()?
            .get_cookies()
            .context("failed to read browser cookies")?;
        Ok(cookies
            .into_iter()
            .map(|cookie| BrowserCookie {
                name: cookie.name,
                value: cookie.value,
            })
            .collect())
    }

    fn shutdown(&mut self) {
        if let Some(tab) = self.tab.take() {
            let _ = tab.close(false);
        }
        // Dropping the handle kills the browser process.
        self.browser.take();
    }
}

impl Drop for ChromeDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
