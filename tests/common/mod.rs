#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use resolvr::{
    http::{FetchRequest, HttpFetch},
    session::{BrowserCookie, BrowserDriver, BrowserLauncher, Sleeper},
};

/// One request as the fake site saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub url: String,
    pub referer: Option<String>,
    pub cookie: Option<String>,
}

/// Serves fixed bodies by exact url; anything else is a failed fetch.
///
/// Clones share the request log, so a test can keep one while the resolver
/// owns another.
#[derive(Clone, Default)]
pub struct FakeSite {
    pages: HashMap<String, String>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), body.to_string());
        self
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn request_for(&self, url: &str) -> Option<SeenRequest> {
        self.seen().into_iter().find(|r| r.url == url)
    }
}

impl HttpFetch for FakeSite {
    async fn fetch(&self, request: FetchRequest<'_>) -> Option<String> {
        self.seen.lock().unwrap().push(SeenRequest {
            url: request.url.to_string(),
            referer: request.referer.map(str::to_string),
            cookie: request.session.and_then(|s| s.cookie_header()),
        });
        self.pages.get(request.url).cloned()
    }
}

/// Browser that passes the challenge on its first poll unless `stuck`.
#[derive(Clone, Default)]
pub struct FakeBrowser {
    pub stuck: bool,
    pub launches: Arc<AtomicUsize>,
    pub shutdowns: Arc<AtomicUsize>,
}

impl FakeBrowser {
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

pub struct FakeTab {
    stuck: bool,
    shutdowns: Arc<AtomicUsize>,
}

impl BrowserLauncher for FakeBrowser {
    type Driver = FakeTab;

    fn launch(&self) -> anyhow::Result<FakeTab> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(FakeTab {
            stuck: self.stuck,
            shutdowns: Arc::clone(&self.shutdowns),
        })
    }
}

impl BrowserDriver for FakeTab {
    fn navigate(&mut self, _url: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn has_element(&mut self, _selector: &str) -> anyhow::Result<bool> {
        Ok(!self.stuck)
    }

    fn cookies(&mut self) -> anyhow::Result<Vec<BrowserCookie>> {
        Ok(vec![BrowserCookie {
            name: "__ddg2_".to_string(),
            value: "passed".to_string(),
        }])
    }

    fn shutdown(&mut self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}
