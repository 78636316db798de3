//! Signed query tokens computed by running the site's own script bundle in
//! an embedded QuickJS interpreter.

use anyhow::{Result, anyhow};
use quick_js::Context;
use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::config::TokenSettings;
use crate::error::TokenError;
use crate::http::{Accept, FetchRequest, HttpFetch};

/// Isolated interpreter able to run `script` followed by `call` and hand back
/// the string the call produced.
pub trait ScriptSandbox {
    fn evaluate(&mut self, script: &str, call: &str) -> Result<String>;
}

/// QuickJS context created on first use and kept for the life of the process.
#[derive(Default)]
pub struct QuickJsSandbox {
    context: Option<Context>,
}

impl QuickJsSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn context(&mut self) -> Result<&Context> {
        if self.context.is_none() {
            debug!("creating script sandbox");
            let context =
                Context::new().map_err(|err| anyhow!("failed to create script context: {err}"))?;
            self.context = Some(context);
        }
        self.context
            .as_ref()
            .ok_or_else(|| anyhow!("script context unavailable"))
    }
}

impl ScriptSandbox for QuickJsSandbox {
    fn evaluate(&mut self, script: &str, call: &str) -> Result<String> {
        let code = format!("{script}\n;{call}");
        self.context()?
            .eval_as::<String>(&code)
            .map_err(|err| anyhow!("{err}"))
    }
}

pub struct TokenEvaluator<S> {
    settings: TokenSettings,
    index_url: String,
    sandbox: S,
    bundle: Option<String>,
}

impl<S: ScriptSandbox> TokenEvaluator<S> {
    pub fn new(settings: TokenSettings, index_url: impl Into<String>, sandbox: S) -> Self {
        Self {
            settings,
            index_url: index_url.into(),
            sandbox,
            bundle: None,
        }
    }

    /// Invocation of the token routine for one episode and client identity.
    pub fn call_expression(&self, episode_id: u64, client_guid: &str) -> String {
        let s = &self.settings;
        let app = js_string(&s.app_name);
        format!(
            "{}({episode_id}, null, {}, {}, {}, {app}, {app}, {app}, {app}, {app}, {app})",
            s.routine,
            js_string(&s.app_version),
            js_string(client_guid),
            s.platform_version,
        )
    }

    /// Computes a fresh token; one failure triggers a bundle refetch and a retry.
    pub async fn compute_token<H: HttpFetch>(
        &mut self,
        http: &H,
        episode_id: u64,
        client_guid: &str,
    ) -> Result<String, TokenError> {
        match self.try_compute(http, episode_id, client_guid).await {
            Ok(token) => Ok(token),
            Err(err) => {
                warn!(episode_id, error = %err, "token generation failed, refetching bundle");
                self.bundle = None;
                self.try_compute(http, episode_id, client_guid).await
            }
        }
    }

    async fn try_compute<H: HttpFetch>(
        &mut self,
        http: &H,
        episode_id: u64,
        client_guid: &str,
    ) -> Result<String, TokenError> {
        if self.bundle.is_none() {
            self.bundle = Some(self.fetch_bundle(http).await?);
        }
        let call = self.call_expression(episode_id, client_guid);
        let bundle = self
            .bundle
            .as_deref()
            .ok_or_else(|| TokenError::BundleUnavailable("bundle not loaded".to_string()))?;
        debug!(episode_id, "evaluating token routine");
        self.sandbox
            .evaluate(bundle, &call)
            .map_err(|err| TokenError::Evaluation(format!("{err:#}")))
    }

    async fn fetch_bundle<H: HttpFetch>(&self, http: &H) -> Result<String, TokenError> {
        debug!(url = %self.index_url, "fetching token script bundle");
        let index = http
            .fetch(FetchRequest::new(&self.index_url).accept(Accept::Html))
            .await
            .ok_or_else(|| TokenError::BundleUnavailable(format!("{} unreachable", self.index_url)))?;
        let src = find_bundle_src(&index, &self.settings.bundle_marker).ok_or_else(|| {
            TokenError::BundleUnavailable(format!(
                "no script matching `{}` on {}",
                self.settings.bundle_marker, self.index_url
            ))
        })?;
        let bundle_url = Url::parse(&self.index_url)
            .and_then(|base| base.join(&src))
            .map_err(|err| TokenError::BundleUnavailable(format!("bad bundle url {src}: {err}")))?;

        let bundle = http
            .fetch(FetchRequest::new(bundle_url.as_str()))
            .await
            .ok_or_else(|| TokenError::BundleUnavailable(format!("{bundle_url} unreachable")))?;
        if !bundle.contains(&self.settings.routine) {
            return Err(TokenError::RoutineNotFound(self.settings.routine.clone()));
        }
        debug!(url = %bundle_url, bytes = bundle.len(), "token script bundle cached");
        Ok(bundle)
    }
}

fn find_bundle_src(html: &str, marker: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse("script[src]").ok()?;
    doc.select(&selector)
        .filter_map(|el| el.value().attr("src"))
        .find(|src| src.contains(marker))
        .map(str::to_string)
}

fn js_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}
