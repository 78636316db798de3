use std::fmt;

use thiserror::Error;

use crate::types::episode_label;

/// Failure to obtain a browser-validated session. Fatal to the whole run.
#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("site did not pass the challenge within {attempts} attempts ({waited_secs}s)")]
    Timeout { attempts: u32, waited_secs: u64 },
    #[error("browser automation failed: {0}")]
    Browser(#[from] anyhow::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnpackError {
    #[error("unable to extract stream link: packed script not found")]
    PatternMismatch,
    #[error("unable to extract stream link: unsupported radix {0}")]
    InvalidRadix(u32),
    #[error("unable to extract stream link: {count} tokens declared but {keys} keys supplied")]
    MalformedTable { count: usize, keys: usize },
    #[error("stream link not found")]
    LinkNotFound,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token script bundle unavailable: {0}")]
    BundleUnavailable(String),
    #[error("token routine `{0}` not present in script bundle")]
    RoutineNotFound(String),
    #[error("token evaluation failed: {0}")]
    Evaluation(String),
}

#[derive(Debug, Error)]
pub enum SubtitleError {
    #[error("subtitle line is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("subtitle ciphertext is malformed")]
    Decrypt,
    #[error("decrypted subtitle is not valid utf-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("no stream variants available")]
    NoVariants,
}

/// Point in an episode's resolution where work stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pending,
    SessionReady,
    LinkFetched,
    Unpacked,
    TokenResolved,
    VariantSelected,
    SubtitlesAttached,
    Resolved,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::SessionReady => "session-ready",
            Stage::LinkFetched => "link-fetched",
            Stage::Unpacked => "unpacked",
            Stage::TokenResolved => "token-resolved",
            Stage::VariantSelected => "variant-selected",
            Stage::SubtitlesAttached => "subtitles-attached",
            Stage::Resolved => "resolved",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an episode could not move past `stage`.
#[derive(Debug, Error)]
pub enum StageCause {
    #[error(transparent)]
    Unpack(#[from] UnpackError),
    #[error(transparent)]
    Token(#[from] TokenError),
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error("{0}")]
    Fetch(String),
    #[error("{0}")]
    Other(String),
}

/// Per-episode failure, annotated with the episode and the last stage reached.
#[derive(Debug, Error)]
#[error("episode {} failed after {stage}: {cause}", label(.episode))]
pub struct StageFailure {
    pub episode: f64,
    pub stage: Stage,
    #[source]
    pub cause: StageCause,
}

fn label(episode: &f64) -> String {
    episode_label(*episode)
}

impl StageFailure {
    pub fn new(episode: f64, stage: Stage, cause: impl Into<StageCause>) -> Self {
        Self {
            episode,
            stage,
            cause: cause.into(),
        }
    }
}
