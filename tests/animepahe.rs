mod common;

use std::path::Path;
use std::time::Duration;

use common::{FakeBrowser, FakeSite, NoSleep};
use resolvr::{
    config::AnimePaheSettings,
    error::ChallengeError,
    providers::{
        animepahe::{AnimePaheResolver, PaheEpisode},
        resolve_batch,
    },
    session::{ChallengeSolver, SessionCache, SessionManager},
    types::DownloadKind,
};

const ROOT: &str = "https://animepahe.ru/";
const PLAY_1: &str = "https://animepahe.ru/play/show/ep-1";
const PLAY_2: &str = "https://animepahe.ru/play/show/ep-2";
const PLAY_3: &str = "https://animepahe.ru/play/show/ep-3";
const KWIK_1: &str = "https://kwik.cx/e/one";
const KWIK_2: &str = "https://kwik.cx/e/two";
const KWIK_3: &str = "https://kwik.cx/e/three";

const KWIK_PAGE: &str = "<script>eval(function(p,a,c,k,e,d){return p}('0 1=\\'2://3.4.5/6/7.8\\';9 a=b c(\\'#d\\',{e:1});',15,15,'const|source|https|eu|kwik|cx|stream|uwu|m3u8|var|player|new|Plyr|video|src'.split('|'),0,{}))</script>";

fn play_page(kwik: &str) -> String {
    format!(
        r#"<html><body>
          <div id="resolutionMenu">
            <button data-src="{kwik}-360" data-resolution="360" data-audio="jpn" data-av1="0">360p</button>
            <button data-src="{kwik}" data-resolution="720" data-audio="jpn" data-av1="0">720p</button>
            <button data-src="{kwik}-eng" data-resolution="720" data-audio="eng" data-av1="1">720p eng</button>
          </div>
          <div id="pickDownload">
            <a href="{kwik}">Fansub · 360p (40MB)</a>
            <a href="{kwik}">Fansub · 720p (90MB)</a>
            <a href="{kwik}">Fansub · 720p (91MB) eng</a>
          </div>
        </body></html>"#
    )
}

fn site() -> FakeSite {
    FakeSite::new()
        .page(ROOT, "<html><nav><a><img></a></nav></html>")
        .page(PLAY_1, &play_page(KWIK_1))
        .page(PLAY_2, &play_page(KWIK_2))
        .page(KWIK_1, KWIK_PAGE)
        .page(KWIK_2, "<html><video src=\"blob:\"></video></html>")
}

fn episodes() -> Vec<PaheEpisode> {
    [(1.0, PLAY_1), (2.0, PLAY_2), (3.0, PLAY_3)]
        .into_iter()
        .map(|(n, link)| PaheEpisode {
            episode: n,
            episode_name: format!("Show Episode {n}"),
            episode_link: link.to_string(),
        })
        .collect()
}

fn resolver(
    http: FakeSite,
    browser: FakeBrowser,
    cache_dir: &Path,
) -> AnimePaheResolver<FakeSite, FakeBrowser, NoSleep> {
    let solver = ChallengeSolver::new(browser, NoSleep, 3, Duration::from_secs(5));
    let sessions = SessionManager::new(SessionCache::new(cache_dir), solver);
    AnimePaheResolver::new(http, sessions, AnimePaheSettings::default())
}

#[tokio::test]
async fn failing_episode_does_not_block_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let http = site();
    let browser = FakeBrowser::default();
    let mut resolver = resolver(http.clone(), browser.clone(), dir.path());

    let records = resolve_batch(&mut resolver, &episodes()).await.unwrap();
    assert_eq!(records.len(), 3);

    let first = &records[0];
    assert!(first.is_resolved());
    assert_eq!(first.resolution.as_deref(), Some("720"));
    assert_eq!(
        first.download_link.as_deref(),
        Some("https://eu.kwik.cx/stream/uwu.m3u8")
    );
    assert_eq!(first.referer_link.as_deref(), Some(KWIK_1));
    assert_eq!(first.download_type, Some(DownloadKind::Hls));

    let second = &records[1];
    assert!(!second.is_resolved());
    assert_eq!(
        second.error.as_deref(),
        Some("episode 2 failed after variant-selected: unable to extract stream link: packed script not found")
    );

    let third = &records[2];
    assert_eq!(third.episode, 3.0);
    assert!(
        third
            .error
            .as_deref()
            .is_some_and(|e| e.starts_with("episode 3 failed after session-ready"))
    );

    assert_eq!(browser.launches(), 1);
    assert_eq!(browser.shutdowns(), 1);
}

#[tokio::test]
async fn packed_script_without_playlist_fails_after_unpacking() {
    let dir = tempfile::tempdir().unwrap();
    let http = site().page(PLAY_3, &play_page(KWIK_3)).page(
        KWIK_3,
        "<script>eval(function(p,a,c,k,e,d){return p}('0 1=2',3,3,'var|player|null'.split('|'),0,{}))</script>",
    );
    let mut resolver = resolver(http, FakeBrowser::default(), dir.path());

    let records = resolve_batch(&mut resolver, &episodes()).await.unwrap();
    assert!(records[0].is_resolved());
    assert_eq!(
        records[2].error.as_deref(),
        Some("episode 3 failed after unpacked: stream link not found")
    );
}

#[tokio::test]
async fn requests_carry_session_and_referer() {
    let dir = tempfile::tempdir().unwrap();
    let http = site();
    let mut resolver = resolver(http.clone(), FakeBrowser::default(), dir.path());
    resolve_batch(&mut resolver, &episodes()[..1]).await.unwrap();

    let play = http.request_for(PLAY_1).unwrap();
    assert_eq!(play.cookie.as_deref(), Some("__ddg2_=passed"));

    let kwik = http.request_for(KWIK_1).unwrap();
    assert_eq!(kwik.referer.as_deref(), Some(PLAY_1));
}

#[tokio::test]
async fn second_run_reuses_cached_session_and_matches() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser::default();

    let mut first = resolver(site(), browser.clone(), dir.path());
    let before = resolve_batch(&mut first, &episodes()).await.unwrap();

    let http = site();
    let mut second = resolver(http.clone(), browser.clone(), dir.path());
    let after = resolve_batch(&mut second, &episodes()).await.unwrap();

    assert_eq!(before, after);
    assert_eq!(browser.launches(), 1);
    assert!(http.request_for(ROOT).is_some());
}

#[tokio::test]
async fn unsolved_challenge_aborts_batch() {
    let dir = tempfile::tempdir().unwrap();
    let browser = FakeBrowser {
        stuck: true,
        ..Default::default()
    };
    let http = site();
    let mut resolver = resolver(http.clone(), browser.clone(), dir.path());

    let err = resolve_batch(&mut resolver, &episodes()).await.unwrap_err();
    assert!(matches!(
        err,
        ChallengeError::Timeout {
            attempts: 3,
            waited_secs: 15
        }
    ));
    assert_eq!(browser.shutdowns(), 1);
    assert!(http.seen().is_empty());
}
