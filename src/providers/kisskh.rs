use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::{debug, warn};

use super::{EpisodeRef, StreamResolver};
use crate::config::KissKhSettings;
use crate::error::{ChallengeError, Stage, StageCause, StageFailure};
use crate::http::{FetchRequest, HttpFetch, fetch_json};
use crate::quality;
use crate::subtitle;
use crate::token::{ScriptSandbox, TokenEvaluator};
use crate::types::{
    DownloadKind, ResolutionRecord, Session, StreamVariant, SubtitleAsset, VariantSet,
};

pub const SITE: &str = "kisskh";

/// Label given to a stream the API returns without quality information.
const DEFAULT_LABEL: &str = "720";
const NOT_RELEASED_HOST: &str = "tickcounter.com";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KissEpisode {
    pub episode: f64,
    #[serde(default)]
    pub episode_name: String,
    pub episode_id: u64,
    /// Number of subtitle tracks the listing advertised.
    #[serde(default)]
    pub episode_subs: u32,
}

impl EpisodeRef for KissEpisode {
    fn number(&self) -> f64 {
        self.episode
    }

    fn name(&self) -> &str {
        &self.episode_name
    }
}

#[derive(Debug, Default, Deserialize)]
struct EpisodeStream {
    #[serde(rename = "Video", default)]
    video: Option<VideoSource>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum VideoSource {
    Direct(String),
    Graded {
        #[serde(default)]
        qualities: BTreeMap<String, String>,
        #[serde(default)]
        url: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct SubtitleListing {
    #[serde(default)]
    label: String,
    #[serde(default)]
    src: String,
}

impl VideoSource {
    fn into_variants(self) -> VariantSet {
        let links = match self {
            VideoSource::Direct(link) => BTreeMap::from([(DEFAULT_LABEL.to_string(), link)]),
            VideoSource::Graded { qualities, url } if qualities.is_empty() => url
                .map(|link| BTreeMap::from([(DEFAULT_LABEL.to_string(), link)]))
                .unwrap_or_default(),
            VideoSource::Graded { qualities, .. } => qualities,
        };
        links
            .into_iter()
            .filter(|(_, link)| !link.is_empty())
            .map(|(label, link)| {
                let kind = DownloadKind::from_link(&link);
                (label.clone(), StreamVariant::new(label, link, kind))
            })
            .collect()
    }
}

pub struct KissKhResolver<H, S> {
    http: H,
    token: TokenEvaluator<S>,
    settings: KissKhSettings,
}

impl<H, S> KissKhResolver<H, S>
where
    H: HttpFetch,
    S: ScriptSandbox,
{
    pub fn new(http: H, sandbox: S, settings: KissKhSettings) -> Self {
        let index_url = format!("{}{}", settings.base_url, settings.index_path);
        let token = TokenEvaluator::new(settings.token.clone(), index_url, sandbox);
        Self {
            http,
            token,
            settings,
        }
    }

    fn api_url(&self, path: &str, episode_id: u64, token: &str) -> String {
        format!(
            "{}{}{token}",
            self.settings.base_url,
            path.replace("{id}", &episode_id.to_string())
        )
    }

    /// Fetches and decrypts every advertised subtitle track.
    ///
    /// Tracks that cannot be fetched or decrypted are dropped with a warning.
    async fn fetch_subtitles(&self, episode: &KissEpisode, token: &str) -> BTreeMap<String, String> {
        let url = self.api_url(&self.settings.subtitles_path, episode.episode_id, token);
        let listing: Option<Vec<SubtitleListing>> =
            fetch_json(&self.http, FetchRequest::new(&url)).await;
        let Some(listing) = listing else {
            warn!(episode = episode.episode, "subtitle listing unavailable");
            return BTreeMap::new();
        };

        let mut subtitles = BTreeMap::new();
        for entry in listing {
            let asset = SubtitleAsset {
                label: entry.label,
                src: entry.src,
            };
            if asset.src.is_empty() {
                continue;
            }
            let Some(body) = self
                .http
                .fetch(FetchRequest::new(&asset.src).referer(&self.settings.base_url))
                .await
            else {
                warn!(episode = episode.episode, label = %asset.label, "failed to fetch subtitle");
                continue;
            };
            match subtitle::decrypt(&asset, &body) {
                Ok(Some(text)) => {
                    subtitles.insert(asset.label, text);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        episode = episode.episode,
                        label = %asset.label,
                        error = %err,
                        "dropping subtitle"
                    );
                }
            }
        }
        subtitles
    }
}

impl<H, S> StreamResolver for KissKhResolver<H, S>
where
    H: HttpFetch,
    S: ScriptSandbox,
{
    type Episode = KissEpisode;

    fn site(&self) -> &str {
        SITE
    }

    /// The API is not behind a browser challenge.
    async fn establish_session(&mut self) -> Result<Session, ChallengeError> {
        Ok(Session::anonymous(SITE))
    }

    async fn resolve(
        &mut self,
        _session: &Session,
        episode: &KissEpisode,
    ) -> Result<ResolutionRecord, StageFailure> {
        let fail = |stage: Stage, cause: StageCause| StageFailure::new(episode.episode, stage, cause);

        let stream_guid = self.settings.token.stream_guid.clone();
        let token = self
            .token
            .compute_token(&self.http, episode.episode_id, &stream_guid)
            .await
            .map_err(|err| fail(Stage::SessionReady, err.into()))?;

        let url = self.api_url(&self.settings.episode_path, episode.episode_id, &token);
        debug!(episode = episode.episode, episode_id = episode.episode_id, "fetching stream info");
        let stream: EpisodeStream = fetch_json(&self.http, FetchRequest::new(&url))
            .await
            .ok_or_else(|| {
                fail(
                    Stage::TokenResolved,
                    StageCause::Fetch("failed to fetch stream link".to_string()),
                )
            })?;
        let variants = stream
            .video
            .map(VideoSource::into_variants)
            .unwrap_or_default();

        if variants.values().any(|v| v.link.contains(NOT_RELEASED_HOST)) {
            return Err(fail(
                Stage::TokenResolved,
                StageCause::Other("not released yet".to_string()),
            ));
        }

        let label = quality::select(
            variants.keys().map(String::as_str),
            &self.settings.resolution,
            self.settings.selector,
        )
        .map_err(|err| fail(Stage::TokenResolved, err.into()))?;
        let variant = variants.get(&label).ok_or_else(|| {
            fail(
                Stage::TokenResolved,
                StageCause::Other(format!("resolution [{label}] not found")),
            )
        })?;
        debug!(episode = episode.episode, variant = %variant.describe(), "variant selected");

        let subtitles = if episode.episode_subs > 0 {
            let subtitle_guid = self.settings.token.subtitle_guid.clone();
            let token = self
                .token
                .compute_token(&self.http, episode.episode_id, &subtitle_guid)
                .await
                .map_err(|err| fail(Stage::VariantSelected, err.into()))?;
            let subtitles = self.fetch_subtitles(episode, &token).await;
            debug!(
                episode = episode.episode,
                stage = %Stage::SubtitlesAttached,
                tracks = subtitles.len(),
                "subtitles attached"
            );
            Some(subtitles).filter(|subs| !subs.is_empty())
        } else {
            None
        };

        Ok(ResolutionRecord {
            episode: episode.episode,
            episode_name: episode.episode_name.clone(),
            resolution: Some(label),
            referer_link: Some(self.settings.base_url.clone()),
            download_link: Some(variant.link.clone()),
            download_type: Some(variant.kind),
            subtitles,
            error: None,
        })
    }
}
