use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DownloadKind {
    Hls,
    Mp4,
}

impl DownloadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadKind::Hls => "hls",
            DownloadKind::Mp4 => "mp4",
        }
    }

    /// Direct files are recognised by their `.mp4` path; anything else is a playlist.
    pub fn from_link(link: &str) -> Self {
        if link.contains(".mp4") {
            DownloadKind::Mp4
        } else {
            DownloadKind::Hls
        }
    }
}

/// Cookies that let requests through a site's bot protection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub site: String,
    pub cookies: BTreeMap<String, String>,
}

impl Session {
    pub fn new(site: impl Into<String>, cookies: BTreeMap<String, String>) -> Self {
        Self {
            site: site.into(),
            cookies,
        }
    }

    /// Session for sites that are not behind a challenge.
    pub fn anonymous(site: impl Into<String>) -> Self {
        Self::new(site, BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamVariant {
    pub label: String,
    pub link: String,
    pub audio: Option<String>,
    pub codec: Option<String>,
    pub size: Option<String>,
    pub kind: DownloadKind,
}

impl StreamVariant {
    pub fn new(label: impl Into<String>, link: impl Into<String>, kind: DownloadKind) -> Self {
        Self {
            label: label.into(),
            link: link.into(),
            audio: None,
            codec: None,
            size: None,
            kind,
        }
    }

    pub fn is_av1(&self) -> bool {
        self.codec.as_deref() == Some("1")
    }

    pub fn describe(&self) -> String {
        let mut out = format!("{}P ({})", self.label, self.kind.as_str());
        if let Some(size) = &self.size {
            out.push_str(&format!(" {size}"));
        }
        if let Some(audio) = &self.audio {
            out.push_str(&format!(" [{audio}]"));
        }
        out
    }
}

/// Variants of one episode keyed by resolution label.
pub type VariantSet = BTreeMap<String, StreamVariant>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleAsset {
    pub label: String,
    pub src: String,
}

/// Final output handed to the download stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionRecord {
    #[serde(serialize_with = "serialize_episode")]
    pub episode: f64,
    pub episode_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referer_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_type: Option<DownloadKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitles: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResolutionRecord {
    pub fn failed(episode: f64, episode_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            episode,
            episode_name: episode_name.into(),
            resolution: None,
            referer_link: None,
            download_link: None,
            download_type: None,
            subtitles: None,
            error: Some(error.into()),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.error.is_none() && self.download_link.is_some()
    }

    pub fn summary(&self) -> String {
        let ep = episode_label(self.episode);
        match (&self.error, &self.download_link) {
            (Some(err), _) => format!("Episode: {ep} | {err}"),
            (None, Some(link)) => format!(
                "Episode: {ep} | {}P | Link found [{link}]",
                self.resolution.as_deref().unwrap_or("?")
            ),
            (None, None) => format!("Episode: {ep} | no link"),
        }
    }
}

/// Whole episode numbers print without a fractional part.
pub fn episode_label(number: f64) -> String {
    if number.fract() == 0.0 {
        format!("{}", number as i64)
    } else {
        format!("{number}")
    }
}

/// Whole episode numbers are written as integers so `1` stays `1`.
fn serialize_episode<S: Serializer>(number: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        serializer.serialize_i64(*number as i64)
    } else {
        serializer.serialize_f64(*number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_is_sorted_and_joined() {
        let mut cookies = BTreeMap::new();
        cookies.insert("srv".to_string(), "s1".to_string());
        cookies.insert("__ddg2".to_string(), "abc".to_string());
        let session = Session::new("animepahe", cookies);
        assert_eq!(session.cookie_header().as_deref(), Some("__ddg2=abc; srv=s1"));
        assert_eq!(Session::anonymous("kisskh").cookie_header(), None);
    }

    #[test]
    fn episode_labels_drop_trailing_zero() {
        assert_eq!(episode_label(12.0), "12");
        assert_eq!(episode_label(12.5), "12.5");
    }

    #[test]
    fn download_kind_follows_extension() {
        assert_eq!(DownloadKind::from_link("https://x/y/video.mp4?t=1"), DownloadKind::Mp4);
        assert_eq!(DownloadKind::from_link("https://x/y/master.m3u8"), DownloadKind::Hls);
    }

    #[test]
    fn episode_numbers_keep_their_site_form() {
        let whole =
            serde_json::to_string(&ResolutionRecord::failed(1.0, "Show Episode 1", "x")).unwrap();
        assert!(whole.starts_with(r#"{"episode":1,"#), "{whole}");

        let half = serde_json::to_string(&ResolutionRecord::failed(12.5, "Show Episode 12.5", "x"))
            .unwrap();
        assert!(half.starts_with(r#"{"episode":12.5,"#), "{half}");

        let back: ResolutionRecord = serde_json::from_str(&whole).unwrap();
        assert_eq!(back.episode, 1.0);
    }

    #[test]
    fn failed_record_serializes_error_only() {
        let record = ResolutionRecord::failed(3.0, "Show Episode 3", "boom");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["episodeName"], "Show Episode 3");
        assert_eq!(json["error"], "boom");
        assert!(json.get("downloadLink").is_none());
    }
}
