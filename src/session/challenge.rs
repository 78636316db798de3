use std::{collections::BTreeMap, time::Duration};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::error::ChallengeError;
use crate::types::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
}

/// One automated browser instance.
pub trait BrowserDriver {
    fn navigate(&mut self, url: &str) -> Result<()>;
    /// `Ok(false)` when nothing matches `selector` yet.
    fn has_element(&mut self, selector: &str) -> Result<bool>;
    fn cookies(&mut self) -> Result<Vec<BrowserCookie>>;
    fn shutdown(&mut self);
}

pub trait BrowserLauncher {
    type Driver: BrowserDriver;

    fn launch(&self) -> Result<Self::Driver>;
}

pub trait Sleeper {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Shuts the driver down when dropped, whichever way the solve ends.
struct DriverGuard<D: BrowserDriver> {
    driver: Option<D>,
}

impl<D: BrowserDriver> DriverGuard<D> {
    fn new(driver: D) -> Self {
        Self {
            driver: Some(driver),
        }
    }

    fn get(&mut self) -> Result<&mut D> {
        self.driver
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("browser already shut down"))
    }

    fn release(&mut self) {
        if let Some(mut driver) = self.driver.take() {
            driver.shutdown();
            debug!("browser shut down");
        }
    }
}

impl<D: BrowserDriver> Drop for DriverGuard<D> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Passes a site's anti-bot page with a real browser and harvests its cookies.
pub struct ChallengeSolver<L, S = ThreadSleeper> {
    launcher: L,
    sleeper: S,
    retries: u32,
    backoff: Duration,
}

impl<L: BrowserLauncher, S: Sleeper> ChallengeSolver<L, S> {
    pub fn new(launcher: L, sleeper: S, retries: u32, backoff: Duration) -> Self {
        Self {
            launcher,
            sleeper,
            retries: retries.max(1),
            backoff,
        }
    }

    pub fn solve(&self, site: &str, url: &str, marker: &str) -> Result<Session, ChallengeError> {
        info!(%site, %url, "solving browser challenge");
        let mut guard = DriverGuard::new(self.launcher.launch()?);
        guard.get()?.navigate(url)?;

        let mut passed = false;
        for attempt in 1..=self.retries {
            if guard.get()?.has_element(marker)? {
                debug!(%site, attempt, "challenge marker present");
                passed = true;
                break;
            }
            debug!(%site, attempt, "challenge marker missing, waiting");
            self.sleeper.sleep(self.backoff);
        }

        if !passed {
            guard.release();
            warn!(%site, retries = self.retries, "challenge not passed");
            return Err(ChallengeError::Timeout {
                attempts: self.retries,
                waited_secs: self.backoff.as_secs().saturating_mul(u64::from(self.retries)),
            });
        }

        let cookies: BTreeMap<String, String> = guard
            .get()?
            .cookies()?
            .into_iter()
            .map(|cookie| (cookie.name, cookie.value))
            .collect();
        guard.release();
        info!(%site, cookies = cookies.len(), "challenge passed");
        Ok(Session::new(site, cookies))
    }
}
