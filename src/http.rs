use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::types::Session;

pub const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0 Safari/537.36";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Accept {
    Html,
    Json,
    #[default]
    Any,
}

impl Accept {
    fn header_value(self) -> &'static str {
        match self {
            Accept::Html => "text/html,application/xhtml+xml,*/*;q=0.8",
            Accept::Json => "application/json",
            Accept::Any => "*/*",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub url: &'a str,
    pub session: Option<&'a Session>,
    pub referer: Option<&'a str>,
    pub accept: Accept,
}

impl<'a> FetchRequest<'a> {
    pub fn new(url: &'a str) -> Self {
        Self {
            url,
            session: None,
            referer: None,
            accept: Accept::Any,
        }
    }

    pub fn session(mut self, session: &'a Session) -> Self {
        self.session = Some(session);
        self
    }

    pub fn referer(mut self, referer: &'a str) -> Self {
        self.referer = Some(referer);
        self
    }

    pub fn accept(mut self, accept: Accept) -> Self {
        self.accept = accept;
        self
    }
}

/// Plain GET access to the sites.
///
/// Implementations never fail loudly: transport errors and non-2xx statuses
/// come back as `None`, and the caller decides whether that is fatal.
#[allow(async_fn_in_trait)]
pub trait HttpFetch {
    async fn fetch(&self, request: FetchRequest<'_>) -> Option<String>;
}

/// Fetches `request` and parses the body as JSON, `None` when either step fails.
pub async fn fetch_json<T, H>(http: &H, request: FetchRequest<'_>) -> Option<T>
where
    T: DeserializeOwned,
    H: HttpFetch,
{
    let url = request.url;
    let body = http.fetch(request.accept(Accept::Json)).await?;
    match serde_json::from_str(&body) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(%url, error = %err, "response is not the expected JSON shape");
            None
        }
    }
}

pub struct ReqwestFetcher {
    client: Client,
}

impl ReqwestFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("failed to create HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpFetch for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest<'_>) -> Option<String> {
        let mut req = self
            .client
            .get(request.url)
            .header("Accept", request.accept.header_value());
        if let Some(referer) = request.referer {
            req = req.header("Referer", referer);
        }
        if let Some(cookie) = request.session.and_then(Session::cookie_header) {
            req = req.header("Cookie", cookie);
        }

        debug!(url = %request.url, "GET");
        let response = match req.send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(url = %request.url, error = %err, "request failed");
                return None;
            }
        };
        let status = response.status();
        if !status.is_success() {
            warn!(url = %request.url, %status, "request returned non-success status");
            return None;
        }
        match response.text().await {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(url = %request.url, error = %err, "failed to read response body");
                None
            }
        }
    }
}
