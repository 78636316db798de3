use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::debug;

use super::{EpisodeRef, StreamResolver};
use crate::config::AnimePaheSettings;
use crate::error::{ChallengeError, Stage, StageCause, StageFailure};
use crate::http::{Accept, FetchRequest, HttpFetch};
use crate::quality;
use crate::session::{BrowserLauncher, SessionManager, SiteIdentity, Sleeper};
use crate::types::{DownloadKind, ResolutionRecord, Session, StreamVariant, VariantSet};
use crate::unpack;

pub const SITE: &str = "animepahe";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaheEpisode {
    pub episode: f64,
    #[serde(default)]
    pub episode_name: String,
    /// Play page, e.g. `https://animepahe.ru/play/<anime>/<episode>`.
    pub episode_link: String,
}

impl EpisodeRef for PaheEpisode {
    fn number(&self) -> f64 {
        self.episode
    }

    fn name(&self) -> &str {
        &self.episode_name
    }
}

pub struct AnimePaheResolver<H, L, S> {
    http: H,
    sessions: SessionManager<L, S>,
    settings: AnimePaheSettings,
}

impl<H, L, S> AnimePaheResolver<H, L, S>
where
    H: HttpFetch,
    L: BrowserLauncher + Send + Sync + 'static,
    S: Sleeper + Send + Sync + 'static,
{
    pub fn new(http: H, sessions: SessionManager<L, S>, settings: AnimePaheSettings) -> Self {
        Self {
            http,
            sessions,
            settings,
        }
    }

    fn identity(&self) -> SiteIdentity {
        SiteIdentity {
            name: SITE.to_string(),
            root_url: self.settings.base_url.clone(),
            marker_selector: self.settings.marker_selector.clone(),
        }
    }
}

impl<H, L, S> StreamResolver for AnimePaheResolver<H, L, S>
where
    H: HttpFetch,
    L: BrowserLauncher + Send + Sync + 'static,
    S: Sleeper + Send + Sync + 'static,
{
    type Episode = PaheEpisode;

    fn site(&self) -> &str {
        SITE
    }

    async fn establish_session(&mut self) -> Result<Session, ChallengeError> {
        let identity = self.identity();
        self.sessions.get_session(&self.http, &identity).await
    }

    async fn resolve(
        &mut self,
        session: &Session,
        episode: &PaheEpisode,
    ) -> Result<ResolutionRecord, StageFailure> {
        let fail = |stage: Stage, cause: StageCause| StageFailure::new(episode.episode, stage, cause);
        let play_url = episode.episode_link.as_str();

        debug!(episode = episode.episode, url = %play_url, "fetching play page");
        let page = self
            .http
            .fetch(
                FetchRequest::new(play_url)
                    .session(session)
                    .accept(Accept::Html),
            )
            .await
            .ok_or_else(|| {
                fail(
                    Stage::SessionReady,
                    StageCause::Fetch(format!("failed to fetch play page {play_url}")),
                )
            })?;
        let variants = parse_variants(&page, &self.settings.skip_audio);
        debug!(
            episode = episode.episode,
            labels = ?variants.keys().collect::<Vec<_>>(),
            "variants found"
        );

        let label = quality::select(
            variants.keys().map(String::as_str),
            &self.settings.resolution,
            self.settings.selector,
        )
        .map_err(|err| fail(Stage::LinkFetched, err.into()))?;
        let variant = variants.get(&label).ok_or_else(|| {
            fail(
                Stage::LinkFetched,
                StageCause::Other(format!("resolution [{label}] not found")),
            )
        })?;
        debug!(episode = episode.episode, variant = %variant.describe(), "variant selected");

        let kwik_page = self
            .http
            .fetch(FetchRequest::new(&variant.link).referer(play_url))
            .await
            .ok_or_else(|| {
                fail(
                    Stage::VariantSelected,
                    StageCause::Fetch(format!("failed to fetch {}", variant.link)),
                )
            })?;
        let script = unpack::unpack(&kwik_page)
            .map_err(|err| fail(Stage::VariantSelected, err.into()))?;
        debug!(
            episode = episode.episode,
            stage = %Stage::Unpacked,
            bytes = script.len(),
            "script unpacked"
        );
        let stream = unpack::find_stream_link(&script)
            .map_err(|err| fail(Stage::Unpacked, err.into()))?;

        Ok(ResolutionRecord {
            episode: episode.episode,
            episode_name: episode.episode_name.clone(),
            resolution: Some(label),
            referer_link: Some(variant.link.clone()),
            download_link: Some(stream),
            download_type: Some(DownloadKind::Hls),
            subtitles: None,
            error: None,
        })
    }
}

/// Variants offered by a play page's resolution menu.
///
/// Buttons pair up with the download menu entries that carry their sizes. A
/// label seen twice is only replaced by an AV1 encode, and audio tracks in
/// `skip_audio` are left out.
pub fn parse_variants(html: &str, skip_audio: &[String]) -> VariantSet {
    let doc = Html::parse_document(html);
    let button_sel = Selector::parse("div#resolutionMenu button").expect("valid CSS selector");
    let size_sel = Selector::parse("div#pickDownload a").expect("valid CSS selector");

    let mut variants = VariantSet::new();
    for (button, size) in doc.select(&button_sel).zip(doc.select(&size_sel)) {
        let attrs = button.value();
        let (Some(label), Some(link)) = (attrs.attr("data-resolution"), attrs.attr("data-src"))
        else {
            continue;
        };
        let audio = attrs.attr("data-audio").unwrap_or_default();
        let codec = attrs.attr("data-av1").unwrap_or_default();

        if variants.contains_key(label) && codec != "1" {
            continue;
        }
        if skip_audio.iter().any(|skip| skip.eq_ignore_ascii_case(audio)) {
            continue;
        }

        let mut variant = StreamVariant::new(label, link, DownloadKind::Hls);
        variant.audio = Some(audio.to_string()).filter(|a| !a.is_empty());
        variant.codec = Some(codec.to_string()).filter(|c| !c.is_empty());
        variant.size = Some(size.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty());
        variants.insert(label.to_string(), variant);
    }
    variants
}
