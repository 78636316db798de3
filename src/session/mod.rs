//! Browser-validated sessions: cached cookie jars, probed before reuse and
//! re-solved through a real browser when the site stops honouring them.

pub mod cache;
pub mod challenge;
pub mod chrome;

use std::sync::Arc;

use anyhow::anyhow;
use tracing::{info, warn};

use crate::error::ChallengeError;
use crate::http::{Accept, FetchRequest, HttpFetch};
use crate::types::Session;

pub use cache::SessionCache;
pub use challenge::{
    BrowserCookie, BrowserDriver, BrowserLauncher, ChallengeSolver, Sleeper, ThreadSleeper,
};
pub use chrome::{ChromeDriver, ChromeLauncher};

/// Where a site's challenge lives and how to tell it has been passed.
#[derive(Debug, Clone)]
pub struct SiteIdentity {
    pub name: String,
    pub root_url: String,
    pub marker_selector: String,
}

pub struct SessionManager<L, S = ThreadSleeper> {
    cache: SessionCache,
    solver: Arc<ChallengeSolver<L, S>>,
}

impl<L, S> SessionManager<L, S>
where
    L: BrowserLauncher + Send + Sync + 'static,
    S: Sleeper + Send + Sync + 'static,
{
    pub fn new(cache: SessionCache, solver: ChallengeSolver<L, S>) -> Self {
        Self {
            cache,
            solver: Arc::new(solver),
        }
    }

    /// Cached session if the site still accepts it, otherwise a freshly solved one.
    pub async fn get_session<H: HttpFetch>(
        &self,
        http: &H,
        site: &SiteIdentity,
    ) -> Result<Session, ChallengeError> {
        if let Some(cached) = self.cache.load(&site.name) {
            let probe = FetchRequest::new(&site.root_url)
                .session(&cached)
                .accept(Accept::Html);
            if http.fetch(probe).await.is_some() {
                info!(site = %site.name, "reusing cached session");
                return Ok(cached);
            }
            warn!(site = %site.name, "cached session rejected, solving again");
            if let Err(err) = self.cache.discard(&site.name) {
                warn!(
                    site = %site.name,
                    error = %format!("{err:#}"),
                    "failed to discard stale session"
                );
            }
        }

        let session = self.solve_blocking(site).await?;
        if let Err(err) = self.cache.save(&session) {
            warn!(site = %site.name, error = %format!("{err:#}"), "failed to persist session");
        }
        Ok(session)
    }

    /// Runs the browser solve on the blocking pool; it sleeps and drives
    /// Chrome synchronously for up to `retries * backoff`.
    async fn solve_blocking(&self, site: &SiteIdentity) -> Result<Session, ChallengeError> {
        let solver = Arc::clone(&self.solver);
        let site = site.clone();
        tokio::task::spawn_blocking(move || {
            solver.solve(&site.name, &site.root_url, &site.marker_selector)
        })
        .await
        .map_err(|err| ChallengeError::Browser(anyhow!("challenge solver task failed: {err}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::challenge::fakes::{FakeLauncher, RecordingSleeper};
    use super::*;
    use std::{
        collections::BTreeMap,
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        time::Duration,
    };

    #[derive(Default)]
    struct ProbeFetcher {
        reject: AtomicBool,
        probes: AtomicUsize,
    }

    impl HttpFetch for ProbeFetcher {
        async fn fetch(&self, _request: FetchRequest<'_>) -> Option<String> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.reject.load(Ordering::SeqCst) {
                None
            } else {
                Some("<html></html>".to_string())
            }
        }
    }

    fn site() -> SiteIdentity {
        SiteIdentity {
            name: "animepahe".to_string(),
            root_url: "https://animepahe.ru/".to_string(),
            marker_selector: "body > header > nav > a > img".to_string(),
        }
    }

    fn manager(
        dir: &std::path::Path,
        launcher: FakeLauncher,
    ) -> SessionManager<FakeLauncher, Arc<RecordingSleeper>> {
        let solver = ChallengeSolver::new(
            launcher,
            Arc::new(RecordingSleeper::default()),
            3,
            Duration::from_secs(5),
        );
        SessionManager::new(SessionCache::new(dir), solver)
    }

    #[tokio::test]
    async fn miss_then_hit_solves_once() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher {
            marker_after: Some(0),
            ..Default::default()
        };
        let manager = manager(dir.path(), launcher.clone());
        let http = ProbeFetcher::default();

        let first = manager.get_session(&http, &site()).await.unwrap();
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(http.probes.load(Ordering::SeqCst), 0);
        assert!(dir.path().join("animepahe.json").exists());

        let second = manager.get_session(&http, &site()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(http.probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejected_probe_resolves_session() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SessionCache::new(dir.path());
        let mut stale = BTreeMap::new();
        stale.insert("__ddg2_".to_string(), "expired".to_string());
        cache.save(&Session::new("animepahe", stale)).unwrap();

        let launcher = FakeLauncher {
            marker_after: Some(0),
            ..Default::default()
        };
        let manager = manager(dir.path(), launcher.clone());
        let http = ProbeFetcher::default();
        http.reject.store(true, Ordering::SeqCst);

        let session = manager.get_session(&http, &site()).await.unwrap();
        assert_eq!(session.cookies.get("__ddg2_").map(String::as_str), Some("solved"));
        assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
        assert_eq!(cache.load("animepahe"), Some(session));
    }

    #[tokio::test]
    async fn solve_runs_off_the_runtime_thread() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher {
            marker_after: Some(0),
            ..Default::default()
        };
        let manager = manager(dir.path(), launcher.clone());
        manager
            .get_session(&ProbeFetcher::default(), &site())
            .await
            .unwrap();

        let threads = launcher.launch_threads.lock().unwrap();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[tokio::test]
    async fn challenge_timeout_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::default();
        let manager = manager(dir.path(), launcher.clone());
        let err = manager
            .get_session(&ProbeFetcher::default(), &site())
            .await
            .unwrap_err();
        assert!(matches!(err, ChallengeError::Timeout { .. }));
        assert!(!dir.path().join("animepahe.json").exists());
        assert_eq!(launcher.shutdowns.load(Ordering::SeqCst), 1);
    }
}
